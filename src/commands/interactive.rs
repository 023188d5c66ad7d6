use std::path::PathBuf;
use std::time::Duration;

use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};
use indicatif::ProgressBar;

use super::run::{enumerator, launch, resolve_start_page};
use crate::session::{self, JobSession};
use crate::site::{Enumerator, Locator, LocatorKind, PageCount};
use crate::utils::paths::{clean_path_input, DEFAULT_FOLDER};
use crate::utils::update::CURRENT_VERSION;
use crate::{Config, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuOption {
    Tag,
    Profile,
    Category,
    Resume,
    CheckUpdate,
    Exit,
}

impl MenuOption {
    const ALL: [MenuOption; 6] = [
        MenuOption::Tag,
        MenuOption::Profile,
        MenuOption::Category,
        MenuOption::Resume,
        MenuOption::CheckUpdate,
        MenuOption::Exit,
    ];

    fn label(self) -> &'static str {
        match self {
            MenuOption::Tag => "Tag: videos with a specific tag",
            MenuOption::Profile => "Profile: all public videos of a member",
            MenuOption::Category => "Category: a listing such as gay-newest",
            MenuOption::Resume => "Resume: continue where you left off",
            MenuOption::CheckUpdate => "Check for updates",
            MenuOption::Exit => "Exit",
        }
    }

    fn kind(self) -> Option<LocatorKind> {
        match self {
            MenuOption::Tag => Some(LocatorKind::Tag),
            MenuOption::Profile => Some(LocatorKind::Profile),
            MenuOption::Category => Some(LocatorKind::Category),
            _ => None,
        }
    }
}

/// Parses a typed page number and checks it against `1..=max`.
fn parse_page(input: &str, max: Option<u32>) -> std::result::Result<u32, String> {
    let page: u32 = input
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a page number", input.trim()))?;
    if page < 1 {
        return Err("pages start at 1".to_string());
    }
    match max {
        Some(max) if page > max => Err(format!("the listing only has {} pages", max)),
        _ => Ok(page),
    }
}

fn identifier_hint(kind: LocatorKind) -> &'static str {
    match kind {
        LocatorKind::Tag => "Tag (the word after /tags/ in the URL, or paste the URL)",
        LocatorKind::Profile => "Member (the part after /members/ in the URL, or paste the URL)",
        LocatorKind::Category => "Category (e.g. gay-newest, or paste the URL)",
    }
}

/// Handles the menu shown when no subcommand is given.
pub async fn interactive_command(config: Config) -> Result<()> {
    let theme = ColorfulTheme::default();

    loop {
        println!();
        println!("{}", style(format!("Thisvid Ripper v{}", CURRENT_VERSION)).cyan().bold());

        let labels: Vec<&str> = MenuOption::ALL.iter().map(|o| o.label()).collect();
        let selection = Select::with_theme(&theme)
            .with_prompt("What do you want to download?")
            .items(&labels)
            .default(0)
            .interact()?;

        let option = MenuOption::ALL[selection];
        let result = match option {
            MenuOption::Exit => {
                println!("Bye!");
                return Ok(());
            }
            MenuOption::CheckUpdate => super::update_command(&config).await,
            MenuOption::Resume => resume_flow(&theme, &config).await,
            _ => match option.kind() {
                Some(kind) => new_job_flow(&theme, &config, kind).await,
                None => Ok(()),
            },
        };

        // A failed job returns to the menu instead of ending the program
        if let Err(e) = result {
            println!("{} {}", style("Error:").red().bold(), e);
        }
    }
}

async fn new_job_flow(theme: &ColorfulTheme, config: &Config, kind: LocatorKind) -> Result<()> {
    let raw: String = Input::with_theme(theme)
        .with_prompt(identifier_hint(kind))
        .validate_with(|input: &String| -> std::result::Result<(), String> {
            Locator::new(kind, input).map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()?;
    let locator = Locator::new(kind, &raw)?;

    let enumerator = enumerator(config)?;
    let start_page = ask_start_page(theme, config, &enumerator, &locator).await?;
    let target_dir = ask_folder(theme)?;

    let job = match session::load(&target_dir) {
        Some(existing) if existing.locator != locator => {
            let resume = Confirm::with_theme(theme)
                .with_prompt(format!(
                    "{} already holds an unfinished job for {} (pages {} → {}). Resume that instead?",
                    target_dir.display(),
                    existing.locator,
                    existing.start_page,
                    existing.end_page
                ))
                .default(false)
                .interact()?;
            if resume {
                JobSession { target_directory: target_dir, ..existing }
            } else {
                JobSession::new(locator, start_page, target_dir)?
            }
        }
        _ => JobSession::new(locator, start_page, target_dir)?,
    };

    launch(config, job, enumerator, true).await.map(|_| ())
}

async fn ask_start_page(
    theme: &ColorfulTheme,
    config: &Config,
    enumerator: &Enumerator,
    locator: &Locator,
) -> Result<u32> {
    let detected = if config.auto_detect_pages {
        let spinner = ProgressBar::new_spinner();
        spinner.set_message(format!("Finding last page of {}...", locator));
        spinner.enable_steady_tick(Duration::from_millis(100));
        let count = enumerator.detect_page_count(locator).await;
        spinner.finish_and_clear();

        match count {
            Ok(PageCount::Known(last)) => {
                println!("  {} Found {} pages", style("✓").green(), last);
                Some(last)
            }
            Ok(PageCount::Unknown) => {
                println!("  {} Couldn't auto-detect the page count", style("!").yellow());
                None
            }
            Err(e) => {
                println!("  {} Couldn't auto-detect the page count: {}", style("!").yellow(), e);
                None
            }
        }
    } else {
        None
    };

    let last_page = match detected {
        Some(last) => last,
        None => {
            let input: String = Input::with_theme(theme)
                .with_prompt("Last page number")
                .validate_with(|input: &String| parse_page(input, None).map(|_| ()))
                .interact_text()?;
            parse_page(&input, None).map_err(crate::Error::Config)?
        }
    };

    let input: String = Input::with_theme(theme)
        .with_prompt(format!("Start from page (1-{})", last_page))
        .default(last_page.to_string())
        .validate_with(|input: &String| parse_page(input, Some(last_page)).map(|_| ()))
        .interact_text()?;
    let requested = parse_page(&input, Some(last_page)).map_err(crate::Error::Config)?;
    Ok(resolve_start_page(last_page, Some(requested)))
}

fn ask_folder(theme: &ColorfulTheme) -> Result<PathBuf> {
    println!("  Tip: drag a folder into the terminal or press Enter for the default");
    let input: String = Input::with_theme(theme)
        .with_prompt("Download folder")
        .default(DEFAULT_FOLDER.to_string())
        .validate_with(|input: &String| -> std::result::Result<(), String> {
            if clean_path_input(input).as_os_str().is_empty() {
                Err("enter a folder path".to_string())
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(clean_path_input(&input))
}

async fn resume_flow(theme: &ColorfulTheme, config: &Config) -> Result<()> {
    let input: String = Input::with_theme(theme)
        .with_prompt("Folder of the job to resume")
        .interact_text()?;
    let dir = clean_path_input(&input);

    if !dir.is_dir() {
        println!("  {} {} doesn't exist", style("!").yellow(), dir.display());
        return Ok(());
    }
    let Some(existing) = session::load(&dir) else {
        println!("  {} No session found in {}", style("!").yellow(), dir.display());
        return Ok(());
    };

    println!("  {} Found session: {}", style("✓").green(), existing.locator);
    let job = JobSession {
        target_directory: dir,
        ..existing
    };
    launch(config, job, enumerator(config)?, true).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        assert_eq!(parse_page(" 3 ", None), Ok(3));
        assert_eq!(parse_page("7", Some(7)), Ok(7));
        assert!(parse_page("8", Some(7)).is_err());
        assert!(parse_page("0", None).is_err());
        assert!(parse_page("abc", None).is_err());
        assert!(parse_page("-2", None).is_err());
    }

    #[test]
    fn test_menu_kinds() {
        assert_eq!(MenuOption::Tag.kind(), Some(LocatorKind::Tag));
        assert_eq!(MenuOption::Category.kind(), Some(LocatorKind::Category));
        assert_eq!(MenuOption::Resume.kind(), None);
        assert_eq!(MenuOption::ALL.len(), 6);
    }
}
