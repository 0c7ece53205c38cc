use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::time::MissedTickBehavior;

use common::{data::format_size, hash_file};

mod config;
mod listing;
mod queue;
mod session;
mod transport;

use config::ApiConfig;
use listing::{FileBrowser, FilterCriteria};
use queue::{parse_tags, UploadQueue, UploadStatus};
use session::SessionStore;
use transport::FileTransport;

#[derive(Parser, Debug)]
#[command(name = "filedeck", version, about = "Console for a remote file store")]
struct Args {
    /// Base URL of the API, e.g. https://host/api; falls back to the
    /// FILEDECK_BASE_URL environment variable
    #[arg(short, long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a session (demo auth: any non-empty credentials are accepted)
    Login {
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// End the current session
    Logout,
    /// Show the current session
    Whoami,
    /// List stored files, one page at a time
    List {
        /// Name substring to match
        #[arg(long)]
        name: Option<String>,
        /// Tag substring to match
        #[arg(long)]
        tag: Option<String>,
        /// Content-type substring to match
        #[arg(long)]
        content_type: Option<String>,
        /// Only files created on or after this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Only files created on or before this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show one file's metadata
    Get { id: String },
    /// Download a file's content
    Download {
        id: String,
        /// Target path; defaults to the server-suggested filename
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch a preview (images and PDFs only)
    Preview {
        id: String,
        /// Target path; defaults to a file in the temp directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload one or more files, concurrently
    Upload {
        paths: Vec<PathBuf>,
        /// Comma-separated tags applied to every file
        #[arg(short, long, default_value = "")]
        tags: String,
        /// Cap on simultaneous uploads (default: no cap)
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
    /// Delete a file (soft and recoverable by default)
    Delete {
        id: String,
        /// Irreversibly delete; requires an admin session
        #[arg(long)]
        hard: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut config = ApiConfig::load();
    if let Some(base_url) = args
        .base_url
        .or_else(|| std::env::var("FILEDECK_BASE_URL").ok())
    {
        config.base_url = base_url;
    }
    let session = SessionStore::open()?;

    match args.command {
        Command::Login { username, password } => {
            let user = session.login(&username, &password)?;
            println!("logged in as {} ({})", user.username, user.role);
        }
        Command::Logout => {
            session.logout()?;
            println!("logged out");
        }
        Command::Whoami => match session.current_user()? {
            Some(user) => println!("{} ({}), id {}", user.username, user.role, user.id),
            None => println!("not logged in"),
        },
        command => {
            // the file area is gated on a session
            if !session.is_authenticated() {
                bail!("not logged in; run `filedeck login <username> --password <password>` first");
            }
            let transport = FileTransport::new(&config, session.token())?;
            run_file_command(command, transport, &config, &session).await?;
        }
    }
    Ok(())
}

async fn run_file_command(
    command: Command,
    transport: FileTransport,
    config: &ApiConfig,
    session: &SessionStore,
) -> Result<()> {
    match command {
        Command::List {
            name,
            tag,
            content_type,
            from,
            to,
            page,
        } => {
            let api = Arc::new(transport);
            let mut browser = FileBrowser::new(api, config.page_size);
            browser
                .set_filters(FilterCriteria {
                    name,
                    tag,
                    content_type,
                    date_from: from,
                    date_to: to,
                })
                .await
                .context("Failed to load files")?;
            if page > 1 {
                browser.go_to_page(page).await.context("Failed to load files")?;
                if browser.current_page() != page {
                    eprintln!(
                        "page {page} is out of range; showing page {}",
                        browser.current_page()
                    );
                }
            }

            if browser.rows().is_empty() {
                println!("no files");
                return Ok(());
            }
            for file in browser.rows() {
                let tags = if file.tags.is_empty() {
                    String::new()
                } else {
                    format!("  [{}]", file.tags.join(", "))
                };
                println!(
                    "{}  {:>10}  {:<24}  {}  {}{}",
                    file.id,
                    format_size(file.size_bytes),
                    file.content_type,
                    file.created_at_utc.format("%Y-%m-%d %H:%M"),
                    file.original_name,
                    tags,
                );
            }
            println!(
                "page {} of {} ({} files)",
                browser.current_page(),
                browser.total_pages(),
                browser.total_count(),
            );
        }

        Command::Get { id } => {
            let file = transport.get(&id).await?;
            println!("id:           {}", file.id);
            println!("key:          {}", file.key);
            println!("name:         {}", file.original_name);
            println!("size:         {}", format_size(file.size_bytes));
            println!("content type: {}", file.content_type);
            println!("checksum:     {}", file.checksum);
            println!("tags:         {}", file.tags.join(", "));
            println!("created:      {}", file.created_at_utc.to_rfc3339());
            if let Some(deleted) = file.deleted_at_utc {
                println!("deleted:      {}", deleted.to_rfc3339());
            }
            if let Some(version) = file.version {
                println!("version:      {version}");
            }
            println!("created by:   {}", file.created_by_user_id);
        }

        Command::Download { id, output } => {
            let meta = transport.get(&id).await.ok();
            let (bytes, suggested) = transport.download(&id).await?;
            let target = output
                .or(suggested.map(PathBuf::from))
                .or_else(|| {
                    meta.as_ref()
                        .map(|m| PathBuf::from(m.original_name.clone()))
                })
                .unwrap_or_else(|| PathBuf::from(format!("{id}.bin")));
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("failed to write {}", target.display()))?;
            if let Some(meta) = meta.filter(|m| !m.checksum.is_empty()) {
                let local = hash_file(std::fs::File::open(&target)?)?;
                if local != meta.checksum {
                    eprintln!(
                        "warning: checksum mismatch (expected {}, got {local})",
                        meta.checksum
                    );
                }
            }
            println!(
                "saved {} ({})",
                target.display(),
                format_size(bytes.len() as u64)
            );
        }

        Command::Preview { id, output } => {
            let file = transport.get(&id).await?;
            if !file.previewable() {
                bail!(
                    "{} is {}; only images and PDFs can be previewed",
                    file.original_name,
                    file.content_type
                );
            }
            let bytes = transport.preview(&id).await?;
            if bytes.is_empty() {
                bail!("preview is empty");
            }
            let target = output.unwrap_or_else(|| {
                std::env::temp_dir().join(format!(
                    "filedeck-preview-{id}.{}",
                    preview_extension(&file.content_type)
                ))
            });
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("failed to write {}", target.display()))?;
            // the preview file is the caller's to release
            println!("preview written to {}; delete it when done", target.display());
        }

        Command::Upload {
            paths,
            tags,
            max_concurrency,
        } => {
            if paths.is_empty() {
                bail!("nothing to upload");
            }
            let tags = parse_tags(&tags);
            let api = Arc::new(transport);
            let mut queue = UploadQueue::new(api, config.max_upload_bytes);
            if let Some(cap) = max_concurrency {
                queue = queue.with_max_concurrency(cap);
            }
            queue.submit(paths, &tags);
            let interrupted = render_progress(&mut queue).await;
            if interrupted {
                bail!("interrupted; in-flight uploads cancelled");
            }
            queue.wait_idle().await;

            for entry in queue.entries() {
                match entry.status {
                    UploadStatus::Success => {
                        let id = entry
                            .response
                            .map(|r| r.id)
                            .unwrap_or_default();
                        println!("uploaded {} -> {id}", entry.name);
                    }
                    _ => {
                        let reason = entry.error.unwrap_or_else(|| "Upload failed".to_string());
                        println!("failed   {}: {reason}", entry.name);
                    }
                }
            }
            let stats = queue.stats();
            println!("{} uploaded, {} failed", stats.success, stats.error);
            if stats.error > 0 {
                bail!("{} upload(s) failed", stats.error);
            }
        }

        Command::Delete { id, hard, yes } => {
            if hard && !session.is_admin() {
                bail!("hard delete requires an admin session");
            }
            let file = transport.get(&id).await?;
            if !yes {
                let question = if hard {
                    format!(
                        "Permanently delete \"{}\"? This cannot be undone. [y/N] ",
                        file.original_name
                    )
                } else {
                    format!("Delete \"{}\"? [y/N] ", file.original_name)
                };
                if !confirm(&question)? {
                    println!("aborted");
                    return Ok(());
                }
            }
            if hard {
                transport.hard_delete(&id).await?;
                println!("permanently deleted {}", file.original_name);
            } else {
                transport.soft_delete(&id).await?;
                println!("deleted {} (recoverable)", file.original_name);
            }
        }

        Command::Login { .. } | Command::Logout | Command::Whoami => unreachable!(),
    }
    Ok(())
}

/// Redraws one bar per entry until every upload settles. Returns true if
/// the user interrupted; the queue is emptied (cancelling in-flight
/// requests) before returning in that case.
async fn render_progress(queue: &mut UploadQueue<FileTransport>) -> bool {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("{msg:24!} [{bar:40}] {percent:>3}%")
        .unwrap()
        .progress_chars("=> ");
    let bars: Vec<ProgressBar> = queue
        .entries()
        .iter()
        .map(|entry| {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_message(entry.name.clone());
            bar
        })
        .collect();

    let mut timer = tokio::time::interval(Duration::from_millis(100));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                while !queue.is_empty() {
                    queue.remove(0);
                }
                for bar in &bars {
                    bar.abandon();
                }
                return true;
            }
        }
        for (bar, entry) in bars.iter().zip(queue.entries()) {
            if bar.is_finished() {
                continue;
            }
            bar.set_position(entry.progress as u64);
            match entry.status {
                UploadStatus::Success => bar.finish(),
                UploadStatus::Error => bar.abandon(),
                _ => {}
            }
        }
        if queue.all_complete() {
            return false;
        }
    }
}

fn preview_extension(content_type: &str) -> String {
    if content_type.contains("pdf") {
        return "pdf".to_string();
    }
    let subtype: String = content_type
        .rsplit('/')
        .next()
        .unwrap_or("bin")
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if subtype.is_empty() {
        "bin".to_string()
    } else {
        subtype
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y"))
}
