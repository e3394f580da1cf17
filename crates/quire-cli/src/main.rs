//! Command-line front end for quire document files.
//!
//! Results print to stdout; logs go to stderr so the output stays pipeable.
//!
//! Usage:
//!   quire new notes.json
//!   quire add-page notes.json
//!   quire set notes.json '"Hello"'
//!   quire set notes.json '$0 + " World"'
//!   quire show notes.json
//!   quire pages notes.json
//!   RUST_LOG=debug quire history notes.json

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use quire_cli::{
    add_page, back, create, delete_page, format_path, open, page_listing, page_result, parse_path,
    rename_page, restore, save, set_line, standard_library,
};
use quire_core::EntryId;

#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(about = "Edit and inspect quire document files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a fresh, empty document file
    New { file: PathBuf },
    /// Print the document's result, or one page's
    Show {
        file: PathBuf,
        /// Page path like 0 or 0.2; defaults to the whole document
        #[arg(long)]
        page: Option<String>,
    },
    /// Set a line's code and print the page's new result
    Set {
        file: PathBuf,
        /// Calculator code, e.g. '"Hello"' or '$0 + 1'
        code: String,
        /// Page path; defaults to the open page
        #[arg(long)]
        page: Option<String>,
        /// Line id to edit; defaults to the trailing empty line
        #[arg(long)]
        line: Option<i64>,
        /// Expose the line under this name
        #[arg(long)]
        name: Option<String>,
    },
    /// Add a page and open it
    AddPage {
        file: PathBuf,
        /// Page path to insert after; defaults to the end of the root level
        #[arg(long)]
        after: Option<String>,
    },
    /// Delete a page together with its nested pages
    RmPage { file: PathBuf, page: String },
    /// Rename a page, rebinding references to it
    RenamePage {
        file: PathBuf,
        page: String,
        name: String,
    },
    /// List every page with its result
    Pages { file: PathBuf },
    /// List history snapshots, oldest first
    History { file: PathBuf },
    /// Show the document as it was some steps back
    Back {
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Make an old snapshot the current state again
    Restore { file: PathBuf, position: usize },
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let library = standard_library();

    match cli.command {
        Command::New { file } => {
            create(&library, &file)?;
            tracing::info!(file = %file.display(), "created");
        }
        Command::Show { file, page } => {
            let session = open(&library, &file)?;
            let value = match page {
                Some(text) => page_result(&library, &session.shown(), &parse_path(&text)?)?,
                None => session.result(),
            };
            println!("{value}");
        }
        Command::Set {
            file,
            code,
            page,
            line,
            name,
        } => {
            let session = open(&library, &file)?;
            let page = match page {
                Some(text) => parse_path(&text)?,
                None => {
                    let open_page = session.shown().view_state.open_page;
                    if open_page.is_empty() {
                        bail!("no page is open; add one with add-page");
                    }
                    open_page
                }
            };
            let value = set_line(&library, &session, &page, line.map(EntryId), name, code)?;
            println!("{value}");
            save(&session, &file)?;
        }
        Command::AddPage { file, after } => {
            let session = open(&library, &file)?;
            let after = match after {
                Some(text) => parse_path(&text)?,
                None => Vec::new(),
            };
            let at = add_page(&session, &after)?;
            println!("added page {}", format_path(&at));
            save(&session, &file)?;
        }
        Command::RmPage { file, page } => {
            let session = open(&library, &file)?;
            delete_page(&session, &parse_path(&page)?)?;
            println!("removed page {page}");
            save(&session, &file)?;
        }
        Command::RenamePage { file, page, name } => {
            let session = open(&library, &file)?;
            rename_page(&session, &parse_path(&page)?, name)?;
            save(&session, &file)?;
        }
        Command::Pages { file } => {
            let session = open(&library, &file)?;
            let listing = page_listing(&library, &session.shown());
            if listing.is_empty() {
                println!("no pages");
            }
            for line in listing {
                println!("{line}");
            }
        }
        Command::History { file } => {
            let session = open(&library, &file)?;
            let timeline = session.timeline();
            if timeline.is_empty() {
                println!("no snapshots");
            }
            for (position, time) in timeline.iter().enumerate() {
                println!("{position}  {time}");
            }
        }
        Command::Back { file, steps } => {
            let session = open(&library, &file)?;
            let (position, value) = back(&session, steps)?;
            println!("snapshot {position}: {value}");
        }
        Command::Restore { file, position } => {
            let session = open(&library, &file)?;
            restore(&session, position)?;
            println!("{}", session.result());
            save(&session, &file)?;
        }
    }
    Ok(())
}
