use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use fiction_forge::Config;
use fiction_forge::models::{Chapter, GenerateRequest, SubChapter, VersionComparison};
use fiction_forge::preferences::{PreferenceStore, Theme};
use fiction_forge::routes::{Route, guard};
use fiction_forge::services::api::ApiClient;
use fiction_forge::services::auth::AuthClient;
use fiction_forge::services::cache::QueryCache;
use fiction_forge::services::job_progress::JobView;
use fiction_forge::services::job_watch::JobWatcher;
use fiction_forge::services::realtime::{RealtimeClient, RealtimeConfig};
use fiction_forge::services::reorder::{ListBackend, OrderedItem, OrderedList};
use fiction_forge::session::SessionContext;
use fiction_forge::utils::word_count::{chapter_progress, sub_chapter_progress};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fiction-forge", about = "Command-line client for fiction-forge")]
struct Cli {
    /// Backend REST API base URL
    #[arg(long, env = "FORGE_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        email: String,
        #[arg(long, env = "FORGE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        email: String,
        #[arg(long, env = "FORGE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    Whoami,
    /// List your trilogies and their books
    Trilogies,
    Chapters {
        book_id: Uuid,
    },
    SubChapters {
        chapter_id: Uuid,
    },
    /// Move a chapter to a new 1-based position within its book
    ReorderChapter {
        book_id: Uuid,
        chapter_id: Uuid,
        position: u32,
    },
    /// Move a sub-chapter to a new 1-based position within its chapter
    ReorderSubChapter {
        chapter_id: Uuid,
        sub_chapter_id: Uuid,
        position: u32,
    },
    /// Word-count progress for a chapter and its sub-chapters
    Progress {
        chapter_id: Uuid,
    },
    /// Queue prose generation for a sub-chapter
    Generate {
        sub_chapter_id: Uuid,
        #[arg(long)]
        instructions: Option<String>,
        /// Regenerate existing prose instead of writing fresh
        #[arg(long)]
        regenerate: bool,
        /// Return as soon as the job is queued
        #[arg(long)]
        no_watch: bool,
    },
    WatchJob {
        job_id: Uuid,
    },
    CancelJob {
        job_id: Uuid,
    },
    /// Version history of a sub-chapter
    Versions {
        sub_chapter_id: Uuid,
    },
    /// Review flags raised on a sub-chapter
    Flags {
        sub_chapter_id: Uuid,
    },
    ResolveFlag {
        flag_id: Uuid,
        #[arg(long)]
        note: Option<String>,
    },
    DeleteChapter {
        chapter_id: Uuid,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Show or change the UI theme
    Theme {
        theme: Option<ThemeArg>,
    },
    /// Resolve an app path the way the router would
    Open {
        path: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ThemeArg {
    Light,
    Dark,
    System,
}

impl From<ThemeArg> for Theme {
    fn from(arg: ThemeArg) -> Self {
        match arg {
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::System => Theme::System,
        }
    }
}

struct App {
    config: Config,
    session: Arc<SessionContext>,
    api: ApiClient,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    let prefs = Arc::new(PreferenceStore::open(&config.state_dir));
    let auth = AuthClient::new(&config.supabase_url, &config.supabase_anon_key);
    let session = Arc::new(SessionContext::new(auth, prefs));
    session.initialize().await;

    let api = ApiClient::new(&config.api_url, session.clone());
    let app = App {
        config,
        session,
        api,
    };

    app.run(cli.command).await
}

impl App {
    /// Fails like a protected route would when nobody is signed in.
    async fn require(&self, route: Route) -> anyhow::Result<()> {
        if guard(route, self.session.is_authenticated().await) == Route::Login {
            bail!("{route} requires sign-in; run `fiction-forge login <email>` first");
        }
        Ok(())
    }

    async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Login { email, password } => {
                let user = self.session.sign_in(&email, &password).await?;
                println!("Signed in as {}", user.email.unwrap_or(email));
            }
            Command::Register { email, password } => {
                match self.session.sign_up(&email, &password).await? {
                    Some(_) => println!("Account created, signed in as {email}"),
                    None => println!("Account created; confirm your email, then log in"),
                }
            }
            Command::Logout => {
                self.session.sign_out().await;
                println!("Signed out");
            }
            Command::Whoami => match self.session.user().await {
                Some(user) => println!("{} ({})", user.email.unwrap_or_default(), user.id),
                None => println!("Not signed in"),
            },
            Command::Trilogies => {
                self.require(Route::Dashboard).await?;
                for trilogy in self.api.list_trilogies().await? {
                    println!("{}  {}", trilogy.id, trilogy.title);
                    for book in self.api.list_books(trilogy.id).await? {
                        println!("    Book {}: {}  ({})", book.book_number, book.title, book.id);
                    }
                }
            }
            Command::Chapters { book_id } => {
                self.require(Route::BookChapters(book_id)).await?;
                print_chapters(&self.api.list_chapters(book_id).await?);
            }
            Command::SubChapters { chapter_id } => {
                self.require(Route::ChapterSubChapters(chapter_id)).await?;
                print_sub_chapters(&self.api.list_sub_chapters(chapter_id).await?);
            }
            Command::ReorderChapter {
                book_id,
                chapter_id,
                position,
            } => {
                self.require(Route::BookChapters(book_id)).await?;
                let list = self.ordered_list::<Chapter>(book_id);
                list.load().await?;
                list.reorder(chapter_id, position)
                    .await
                    .context("Chapter reorder failed")?;
                print_chapters(&list.load().await?);
            }
            Command::ReorderSubChapter {
                chapter_id,
                sub_chapter_id,
                position,
            } => {
                self.require(Route::ChapterSubChapters(chapter_id)).await?;
                let list = self.ordered_list::<SubChapter>(chapter_id);
                list.load().await?;
                list.reorder(sub_chapter_id, position)
                    .await
                    .context("Sub-chapter reorder failed")?;
                print_sub_chapters(&list.load().await?);
            }
            Command::Progress { chapter_id } => {
                self.require(Route::ChapterSubChapters(chapter_id)).await?;
                let report = self.api.chapter_progress(chapter_id).await?;
                let progress = chapter_progress(
                    report.current_word_count,
                    report.target_word_count.unwrap_or(0),
                );
                println!(
                    "Chapter: {}/{} words ({:.0}%, {:?})",
                    progress.current, progress.target, progress.percentage, progress.status
                );
                for sub in self.api.list_sub_chapters(chapter_id).await? {
                    let progress = sub_chapter_progress(sub.word_count);
                    println!(
                        "  {:>3}. {:<40} {:>5} words ({:.0}%, {:?})",
                        sub.sub_chapter_number,
                        sub.title.unwrap_or_default(),
                        progress.current,
                        progress.percentage,
                        progress.status
                    );
                }
            }
            Command::Generate {
                sub_chapter_id,
                instructions,
                regenerate,
                no_watch,
            } => {
                self.require(Route::GenerationQueue).await?;
                let request = GenerateRequest {
                    instructions,
                    ..Default::default()
                };
                let job = if regenerate {
                    self.api.regenerate_sub_chapter(sub_chapter_id, &request).await?
                } else {
                    self.api.generate_sub_chapter(sub_chapter_id, &request).await?
                };
                println!("Queued generation job {}", job.id);
                if !no_watch {
                    self.watch_job(job.id).await?;
                }
            }
            Command::WatchJob { job_id } => {
                self.require(Route::GenerationQueue).await?;
                self.watch_job(job_id).await?;
            }
            Command::CancelJob { job_id } => {
                self.require(Route::GenerationQueue).await?;
                self.api.cancel_job(job_id).await?;
                println!("Cancellation requested for {job_id}");
            }
            Command::Versions { sub_chapter_id } => {
                self.require(Route::Dashboard).await?;
                let versions = self.api.list_versions(sub_chapter_id).await?;
                for version in &versions {
                    println!(
                        "v{:<3} {:>6} words{}",
                        version.version_number,
                        version.word_count,
                        if version.is_current { "  (current)" } else { "" }
                    );
                }
                if let [newest, previous, ..] = versions.as_slice() {
                    let cmp = VersionComparison::between(previous, newest);
                    println!(
                        "v{} → v{}: {:+} words",
                        cmp.older_version, cmp.newer_version, cmp.word_delta
                    );
                }
            }
            Command::Flags { sub_chapter_id } => {
                self.require(Route::Dashboard).await?;
                for flag in self.api.list_review_flags(sub_chapter_id).await? {
                    let state = if flag.is_resolved { "resolved" } else { "open" };
                    println!(
                        "{}  [{}] {}: {}",
                        flag.id,
                        state,
                        flag.flag_type,
                        flag.reason.unwrap_or_default()
                    );
                }
            }
            Command::ResolveFlag { flag_id, note } => {
                self.require(Route::Dashboard).await?;
                self.api.resolve_review_flag(flag_id, note).await?;
                println!("Resolved flag {flag_id}");
            }
            Command::DeleteChapter { chapter_id, yes } => {
                self.require(Route::ChapterSubChapters(chapter_id)).await?;
                let chapter = self.api.get_chapter(chapter_id).await?;
                let subs = self.api.list_sub_chapters(chapter_id).await?;

                println!("{}", deletion_notice(&chapter, subs.len(), yes));
                print_sub_chapters(&subs);
                if !yes {
                    bail!("Nothing deleted; re-run with --yes to confirm");
                }

                self.api.delete_chapter(chapter_id).await?;
                println!("Deleted chapter {chapter_id}");
            }
            Command::Theme { theme } => {
                if let Some(theme) = theme {
                    self.session.set_theme(theme.into());
                }
                println!("{:?}", self.session.theme());
            }
            Command::Open { path } => {
                let route = Route::parse(&path).with_context(|| format!("No route for {path}"))?;
                let landed = guard(route, self.session.is_authenticated().await);
                println!("{landed}");
            }
        }

        Ok(())
    }

    fn ordered_list<T>(&self, parent_id: Uuid) -> OrderedList<T, ApiClient>
    where
        T: OrderedItem,
        ApiClient: ListBackend<T>,
    {
        OrderedList::new(
            parent_id,
            Arc::new(QueryCache::new()),
            Arc::new(self.api.clone()),
        )
    }

    async fn watch_job(&self, job_id: Uuid) -> anyhow::Result<()> {
        let realtime = Arc::new(RealtimeClient::new(
            RealtimeConfig::from(&self.config),
            self.session.clone(),
        ));
        realtime.connect();

        let watcher = JobWatcher::new(
            self.api.clone(),
            realtime.clone(),
            self.config.poll_interval,
        );
        let outcome = watcher
            .watch(job_id, |view| match view {
                JobView::Running(progress) => println!(
                    "{:>5.1}%  {}",
                    progress.percent,
                    progress.stage.as_deref().unwrap_or("working")
                ),
                JobView::Completed => println!("Completed"),
                JobView::Failed { error } => println!("Failed: {error}"),
                JobView::Cancelled => println!("Cancelled"),
            })
            .await;

        realtime.disconnect().await;

        match outcome? {
            JobView::Failed { error } => bail!("Generation job {job_id} failed: {error}"),
            _ => Ok(()),
        }
    }
}

fn deletion_notice(chapter: &Chapter, sub_chapters: usize, confirmed: bool) -> String {
    let verb = if confirmed { "Deleting" } else { "Would delete" };
    format!(
        "{verb} chapter {} \"{}\" and its {} sub-chapter(s):",
        chapter.chapter_number, chapter.title, sub_chapters
    )
}

fn print_chapters(chapters: &[Chapter]) {
    for chapter in chapters {
        println!(
            "{:>3}. {:<40} {:>6} words  ({})",
            chapter.chapter_number, chapter.title, chapter.current_word_count, chapter.id
        );
    }
}

fn print_sub_chapters(subs: &[SubChapter]) {
    for sub in subs {
        println!(
            "{:>3}. {:<40} {:>6} words  ({})",
            sub.sub_chapter_number,
            sub.title.as_deref().unwrap_or("(untitled)"),
            sub.word_count,
            sub.id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter() -> Chapter {
        Chapter {
            id: Uuid::nil(),
            book_id: Uuid::nil(),
            chapter_number: 4,
            title: "The Crossing".into(),
            chapter_plot: None,
            character_id: None,
            target_word_count: None,
            current_word_count: 0,
            updated_at: None,
        }
    }

    #[test]
    fn test_deletion_notice_without_confirmation() {
        let notice = deletion_notice(&chapter(), 3, false);
        assert_eq!(
            notice,
            "Would delete chapter 4 \"The Crossing\" and its 3 sub-chapter(s):"
        );
    }

    #[test]
    fn test_deletion_notice_when_confirmed() {
        assert!(deletion_notice(&chapter(), 0, true).starts_with("Deleting chapter 4"));
    }
}
