use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wikiquery_core::edit::{DeleteOutcome, EditRequest, MoveOptions, delete_page, edit_page, move_page, purge_pages};
use wikiquery_core::listing::{
    AllPages, Backlinks, CategoryMembers, Listing, RecentChanges, Search, enumerate,
    enumerate_generated,
};
use wikiquery_core::page::{PageEntity, PageQueryOptions, RevisionOrder};
use wikiquery_core::refresh::{fetch_revisions, refresh_pages};
use wikiquery_core::site::{fetch_account_info, fetch_csrf_token, login};
use wikiquery_core::{
    CancellationToken, ClientConfig, Credentials, HttpTransport, SiteLimits, WikiConfig,
    load_config,
};

#[derive(Debug, Parser)]
#[command(
    name = "wikiquery",
    version,
    about = "Query and edit a MediaWiki site through the Action API"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = "wikiquery.toml")]
    config: PathBuf,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Refresh pages by title (or page id with --ids)
    Pages(PagesArgs),
    /// Fetch revisions by revision id
    Revisions(RevisionsArgs),
    /// Walk a list module
    List(ListArgs),
    /// Show the account the client is operating as
    Whoami,
    /// Purge the parser cache of pages
    Purge { titles: Vec<String> },
    /// Replace the text of a page with the contents of a file
    Edit(EditArgs),
    /// Rename a page
    Move(MoveArgs),
    /// Delete a page
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
struct PagesArgs {
    #[arg(required = true)]
    targets: Vec<String>,
    #[arg(long, help = "Treat targets as page ids")]
    ids: bool,
    #[arg(long, help = "Include revision content")]
    content: bool,
    #[arg(long, help = "Follow redirects")]
    redirects: bool,
    #[arg(long, help = "Report the oldest revision instead of the newest (single target only)")]
    oldest: bool,
}

#[derive(Debug, Args)]
struct RevisionsArgs {
    #[arg(required = true)]
    ids: Vec<i64>,
    #[arg(long, help = "Include revision content")]
    content: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[command(subcommand)]
    source: ListSource,
    #[arg(long, global = true, help = "Stop after this many items")]
    limit: Option<usize>,
    #[arg(long, global = true, help = "Use the list as a generator and report page info")]
    generate: bool,
    #[arg(long, global = true, help = "Follow redirects when generating")]
    redirects: bool,
}

#[derive(Debug, Subcommand)]
enum ListSource {
    Allpages {
        #[arg(long, default_value_t = 0)]
        namespace: i32,
        #[arg(long)]
        prefix: Option<String>,
    },
    Category {
        name: String,
    },
    Recent {
        #[arg(long, default_value_t = 24)]
        hours: i64,
        #[arg(long = "namespace")]
        namespaces: Vec<i32>,
    },
    Backlinks {
        title: String,
        #[arg(long, help = "Include links through redirects")]
        through_redirects: bool,
    },
    Search {
        query: String,
        #[arg(long = "namespace")]
        namespaces: Vec<i32>,
    },
}

#[derive(Debug, Args)]
struct EditArgs {
    title: String,
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    #[arg(long, default_value = "")]
    summary: String,
    #[arg(long)]
    minor: bool,
    #[arg(long)]
    bot: bool,
    #[arg(long, help = "Fail if the page already exists")]
    create_only: bool,
}

#[derive(Debug, Args)]
struct MoveArgs {
    from: String,
    to: String,
    #[arg(long, default_value = "")]
    reason: String,
    #[arg(long)]
    move_talk: bool,
    #[arg(long)]
    no_redirect: bool,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    title: String,
    #[arg(long, default_value = "")]
    reason: String,
}

struct Session {
    api: HttpTransport,
    limits: SiteLimits,
    cancel: CancellationToken,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.config)?;
    let json = cli.json;
    match cli.command {
        Commands::Pages(args) => run_pages(&config, args, json),
        Commands::Revisions(args) => run_revisions(&config, args, json),
        Commands::List(args) => run_list(&config, args, json),
        Commands::Whoami => run_whoami(&config, json),
        Commands::Purge { titles } => run_purge(&config, titles, json),
        Commands::Edit(args) => run_edit(&config, args, json),
        Commands::Move(args) => run_move(&config, args, json),
        Commands::Delete(args) => run_delete(&config, args, json),
    }
}

/// Connect, log in when credentials are present, and detect the privilege tier.
fn open_session(config: &WikiConfig, require_login: bool) -> Result<Session> {
    let client_config = ClientConfig::from_config(config);
    if client_config.api_url.is_empty() {
        bail!("no API URL configured; set WIKI_API_URL or [wiki] api_url");
    }
    let mut api = HttpTransport::new(client_config)?;
    match Credentials::from_env(config) {
        Some(credentials) => {
            login(&mut api, &credentials.username, &credentials.password)?;
        }
        None if require_login => bail!("WIKI_USERNAME and WIKI_PASSWORD are required for this command"),
        None => info!("no credentials configured, continuing anonymously"),
    }
    let account = fetch_account_info(&mut api)?;
    Ok(Session {
        api,
        limits: account.site_limits(),
        cancel: CancellationToken::new(),
    })
}

fn run_pages(config: &WikiConfig, args: PagesArgs, json: bool) -> Result<()> {
    let mut session = open_session(config, false)?;
    let mut pages = if args.ids {
        args.targets
            .iter()
            .map(|target| {
                target
                    .parse::<i64>()
                    .map(PageEntity::from_id)
                    .with_context(|| format!("invalid page id: {target}"))
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        args.targets.iter().map(PageEntity::new).collect()
    };
    let options = PageQueryOptions {
        fetch_content: args.content,
        follow_redirects: args.redirects,
        order: if args.oldest {
            RevisionOrder::OldestFirst
        } else {
            RevisionOrder::NewestFirst
        },
    };
    refresh_pages(
        &mut session.api,
        &mut pages,
        &options,
        session.limits,
        &session.cancel,
    )?;

    if json {
        return print_json(&pages);
    }
    for page in &pages {
        println!("title: {}", page.title);
        println!("page_id: {}", page.page_id);
        println!("namespace: {}", page.namespace);
        println!("exists: {}", page.exists);
        if !page.redirect_trace.is_empty() {
            println!("redirected_from: {}", page.redirect_trace.join(" -> "));
        }
        if let Some(revision) = &page.revision {
            println!("revision: {}", revision.id);
            if let Some(timestamp) = revision.timestamp {
                println!("timestamp: {}", timestamp.to_rfc3339());
            }
        }
        if let Some(content) = page.content() {
            println!("content:\n{content}");
        }
        println!();
    }
    Ok(())
}

fn run_revisions(config: &WikiConfig, args: RevisionsArgs, json: bool) -> Result<()> {
    let mut session = open_session(config, false)?;
    let options = PageQueryOptions {
        fetch_content: args.content,
        ..PageQueryOptions::default()
    };
    let revisions = fetch_revisions(
        &mut session.api,
        &args.ids,
        &options,
        session.limits,
        &session.cancel,
    )?;

    if json {
        return print_json(&revisions);
    }
    for (id, revision) in args.ids.iter().zip(&revisions) {
        match revision {
            Some(revision) => {
                println!(
                    "{id}: {} by {}",
                    revision.title.as_deref().unwrap_or("<unknown>"),
                    revision.user.as_deref().unwrap_or("<hidden>")
                );
                if let Some(content) = &revision.content {
                    println!("{content}");
                }
            }
            None => println!("{id}: missing"),
        }
    }
    Ok(())
}

fn run_list(config: &WikiConfig, args: ListArgs, json: bool) -> Result<()> {
    let listing: Box<dyn Listing> = match args.source {
        ListSource::Allpages { namespace, prefix } => Box::new(AllPages { namespace, prefix }),
        ListSource::Category { name } => Box::new(CategoryMembers::new(&name)),
        ListSource::Recent { hours, namespaces } => Box::new(RecentChanges {
            since: Utc::now() - Duration::hours(hours),
            namespaces,
            types: Vec::new(),
        }),
        ListSource::Backlinks {
            title,
            through_redirects,
        } => Box::new(Backlinks {
            title,
            namespace: None,
            through_redirects,
        }),
        ListSource::Search { query, namespaces } => Box::new(Search { query, namespaces }),
    };

    let mut session = open_session(config, false)?;
    if args.generate {
        let pages = enumerate_generated(
            &mut session.api,
            listing.as_ref(),
            session.limits,
            args.redirects,
            &session.cancel,
        )?;
        if json {
            return print_json(&pages);
        }
        for page in &pages {
            println!("{}\t{}\t{}", page.page_id, page.namespace, page.title);
        }
        return Ok(());
    }

    let items = enumerate(
        &mut session.api,
        listing.as_ref(),
        session.limits,
        args.limit,
        &session.cancel,
    )?;
    if json {
        return print_json(&items);
    }
    for item in &items {
        println!("{}\t{}", item.namespace, item.title);
    }
    println!("total: {}", items.len());
    Ok(())
}

fn run_whoami(config: &WikiConfig, json: bool) -> Result<()> {
    let mut session = open_session(config, false)?;
    let account = fetch_account_info(&mut session.api)?;
    if json {
        return print_json(&account);
    }
    println!("name: {}", account.name);
    println!("id: {}", account.id);
    println!("anonymous: {}", account.anonymous);
    println!("groups: {}", account.groups.join(", "));
    println!("tier: {:?}", account.site_limits().tier);
    Ok(())
}

fn run_purge(config: &WikiConfig, titles: Vec<String>, json: bool) -> Result<()> {
    if titles.is_empty() {
        bail!("no titles given");
    }
    let mut session = open_session(config, false)?;
    let results = purge_pages(&mut session.api, &titles, session.limits)?;
    if json {
        return print_json(&results);
    }
    for result in &results {
        let status = if result.missing {
            "missing"
        } else if result.purged {
            "purged"
        } else {
            "skipped"
        };
        println!("{status}: {}", result.title);
    }
    Ok(())
}

fn run_edit(config: &WikiConfig, args: EditArgs, json: bool) -> Result<()> {
    let text = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let mut session = open_session(config, true)?;
    let token = fetch_csrf_token(&mut session.api)?;
    let request = EditRequest {
        summary: args.summary,
        minor: args.minor,
        bot: args.bot,
        create_only: args.create_only,
        ..EditRequest::new(args.title, text)
    };
    let outcome = edit_page(&mut session.api, &token, &request)?;
    if json {
        return print_json(&outcome);
    }
    if outcome.no_change {
        println!("no change: {}", request.title);
    } else {
        println!(
            "edited: {} (revision {})",
            request.title,
            outcome
                .new_revision_id
                .map_or_else(|| "unknown".to_string(), |id| id.to_string())
        );
    }
    Ok(())
}

fn run_move(config: &WikiConfig, args: MoveArgs, json: bool) -> Result<()> {
    let mut session = open_session(config, true)?;
    let token = fetch_csrf_token(&mut session.api)?;
    let outcome = move_page(
        &mut session.api,
        &token,
        &args.from,
        &args.to,
        &args.reason,
        MoveOptions {
            move_talk: args.move_talk,
            no_redirect: args.no_redirect,
        },
    )?;
    if json {
        return print_json(&outcome);
    }
    println!("moved: {} -> {}", outcome.from, outcome.to);
    if let (Some(from), Some(to)) = (&outcome.talk_from, &outcome.talk_to) {
        println!("moved: {from} -> {to}");
    }
    Ok(())
}

fn run_delete(config: &WikiConfig, args: DeleteArgs, json: bool) -> Result<()> {
    let mut session = open_session(config, true)?;
    let token = fetch_csrf_token(&mut session.api)?;
    let outcome = delete_page(&mut session.api, &token, &args.title, &args.reason)?;
    if json {
        return print_json(&outcome);
    }
    match outcome {
        DeleteOutcome::Deleted { .. } => println!("deleted: {}", args.title),
        DeleteOutcome::AlreadyMissing => println!("already missing: {}", args.title),
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "wikiquery", "list", "category", "Birds", "--generate", "--redirects",
        ])
        .expect("parse");
        let Commands::List(args) = cli.command else {
            panic!("expected list command");
        };
        assert!(args.generate);
        assert!(args.redirects);
        assert!(matches!(args.source, ListSource::Category { ref name } if name == "Birds"));
    }

    #[test]
    fn pages_requires_targets() {
        assert!(Cli::try_parse_from(["wikiquery", "pages"]).is_err());
    }
}
