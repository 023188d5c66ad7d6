use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

pub mod page;

pub use page::{detect_last_page, extract_video_links, Enumerator, HttpPageSource, PageCount, PageSource};

/// Kind of listing a [`Locator`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    Tag,
    Profile,
    Category,
}

impl LocatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LocatorKind::Tag => "tag",
            LocatorKind::Profile => "profile",
            LocatorKind::Category => "category",
        }
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tag" => Ok(LocatorKind::Tag),
            "profile" => Ok(LocatorKind::Profile),
            "category" => Ok(LocatorKind::Category),
            other => Err(Error::Config(format!("unknown locator type '{}'", other))),
        }
    }
}

/// What to scrape: a tag slug, a member's public videos, or a category slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "identifier", rename_all = "lowercase")]
pub enum Locator {
    Tag(String),
    Profile(String),
    Category(String),
}

impl Locator {
    /// Builds a locator from a kind and an operator-supplied identifier.
    ///
    /// The identifier may also be a pasted listing URL of the same kind.
    pub fn new(kind: LocatorKind, identifier: &str) -> Result<Self> {
        let identifier = identifier.trim();

        if identifier.starts_with("http://") || identifier.starts_with("https://") {
            let locator = Self::from_url(identifier)?;
            if locator.kind() != kind {
                return Err(Error::Config(format!(
                    "{} is a {} URL, expected a {}",
                    identifier,
                    locator.kind(),
                    kind
                )));
            }
            return Ok(locator);
        }

        if identifier.is_empty() {
            return Err(Error::Config(format!("{} name cannot be empty", kind)));
        }
        if identifier.contains('/') || identifier.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "'{}' is not a valid {} (no slashes or spaces)",
                identifier, kind
            )));
        }

        Ok(match kind {
            LocatorKind::Tag => Locator::Tag(identifier.to_string()),
            LocatorKind::Profile => Locator::Profile(identifier.to_string()),
            LocatorKind::Category => Locator::Category(identifier.to_string()),
        })
    }

    /// Recognises a listing URL such as `/tags/feet/2/`,
    /// `/members/123/public_videos/` or `/gay-newest/`.
    pub fn from_url(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim()).map_err(|e| Error::InvalidUrl(format!("{}: {}", input, e)))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            ["members", user, "public_videos", ..] => Ok(Locator::Profile(user.to_string())),
            ["tags", tag, ..] => Ok(Locator::Tag(tag.to_string())),
            [first, ..] if first.parse::<u32>().is_err() && *first != "members" && *first != "tags" => {
                Ok(Locator::Category(first.to_string()))
            }
            _ => Err(Error::InvalidUrl(format!("{} is not a tag, profile or category listing", input))),
        }
    }

    pub fn kind(&self) -> LocatorKind {
        match self {
            Locator::Tag(_) => LocatorKind::Tag,
            Locator::Profile(_) => LocatorKind::Profile,
            Locator::Category(_) => LocatorKind::Category,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Locator::Tag(id) | Locator::Profile(id) | Locator::Category(id) => id,
        }
    }

    /// URL of listing page `page` under `base` (e.g. `https://thisvid.com`).
    ///
    /// Tags always carry the page number; profiles and categories leave it
    /// off for page 1.
    pub fn build_url(&self, base: &str, page: u32) -> String {
        let base = base.trim_end_matches('/');
        match self {
            Locator::Tag(slug) => format!("{}/tags/{}/{}/", base, slug, page),
            Locator::Profile(user) if page <= 1 => format!("{}/members/{}/public_videos/", base, user),
            Locator::Profile(user) => format!("{}/members/{}/public_videos/{}/", base, user, page),
            Locator::Category(slug) if page <= 1 => format!("{}/{}/", base, slug),
            Locator::Category(slug) => format!("{}/{}/{}/", base, slug, page),
        }
    }

    /// Folder name for a job when the operator doesn't pick one.
    pub fn folder_name(&self) -> String {
        sanitize_filename::sanitize(format!("{}-{}", self.kind(), self.identifier()))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind(), self.identifier())
    }
}
