use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::auth;
use crate::card::{CardAction, CardView, RenderedCard};
use crate::config::{self, Config};
use crate::data::{MemoryStore, PostStore};
use crate::driver::{FeedDriver, FeedEvent, FeedView, PostEvent, ProfileDriver, ProfileEvent};
use crate::session::{Identity, Session};
use crate::social::{self, PostDraft, PostId};

pub const USAGE: &str = "social-feed - Browse, post and follow on the Noroff social API.

Usage: social-feed [--demo] [--config PATH] <command>

Commands:
  feed [--search TERM] [--more N]       List the newest posts
  posts <name> [--search TERM] [--more N]
                                        List posts by one profile
  profile <name>                        Show a profile with its posts
  follow <name>                         Follow or unfollow a profile
  post <id>                             Show a single post
  create --title T [--body B] [--image URL]
  edit <id> [--title T] [--body B] [--image URL]
  delete <id> --yes
  login <email> <password>              Store an access token in the config file
  register <name> <email> <password>
  logout                                Remove the stored access token

Options:
  --demo               Use built-in sample data instead of the API
  --config PATH        Read and write this config file
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Feed { search: String, more: usize },
    Posts { name: String, search: String, more: usize },
    Profile { name: String },
    Follow { name: String },
    Post { id: PostId },
    Create { title: String, body: String, image: String },
    Edit { id: PostId, title: Option<String>, body: Option<String>, image: Option<String> },
    Delete { id: PostId, confirmed: bool },
    Login { email: String, password: String },
    Register { name: String, email: String, password: String },
    Logout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub demo: bool,
    pub config_file: Option<PathBuf>,
    pub command: Command,
}

pub fn parse_args<I>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut demo = false;
    let mut config_file = None;
    let mut rest = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--demo" => demo = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config_file = Some(PathBuf::from(path));
            }
            _ => rest.push(arg),
        }
    }

    let mut words = rest.into_iter();
    let name = words.next().context("missing command; see --help")?;
    let mut positional = Vec::new();
    let mut flags = Vec::new();
    while let Some(word) = words.next() {
        match word.as_str() {
            "--yes" => flags.push((word, String::new())),
            flag if flag.starts_with("--") => {
                let value = words
                    .next()
                    .with_context(|| format!("{flag} needs a value"))?;
                flags.push((word, value));
            }
            _ => positional.push(word),
        }
    }
    let flag = |key: &str| {
        flags
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    };
    let more = |raw: Option<String>| -> Result<usize> {
        raw.map_or(Ok(0), |value| {
            value
                .parse()
                .with_context(|| format!("--more expects a number, got {value}"))
        })
    };
    let arg = |index: usize, label: &str| -> Result<String> {
        positional
            .get(index)
            .cloned()
            .with_context(|| format!("{name} needs <{label}>"))
    };
    let post_id = |value: String| -> Result<PostId> {
        value
            .parse()
            .with_context(|| format!("invalid post id {value}"))
    };

    let command = match name.as_str() {
        "feed" => Command::Feed {
            search: flag("--search").unwrap_or_default(),
            more: more(flag("--more"))?,
        },
        "posts" => Command::Posts {
            name: arg(0, "name")?,
            search: flag("--search").unwrap_or_default(),
            more: more(flag("--more"))?,
        },
        "profile" => Command::Profile { name: arg(0, "name")? },
        "follow" => Command::Follow { name: arg(0, "name")? },
        "post" => Command::Post {
            id: post_id(arg(0, "id")?)?,
        },
        "create" => Command::Create {
            title: flag("--title").context("create needs --title")?,
            body: flag("--body").unwrap_or_default(),
            image: flag("--image").unwrap_or_default(),
        },
        "edit" => Command::Edit {
            id: post_id(arg(0, "id")?)?,
            title: flag("--title"),
            body: flag("--body"),
            image: flag("--image"),
        },
        "delete" => Command::Delete {
            id: post_id(arg(0, "id")?)?,
            confirmed: flag("--yes").is_some(),
        },
        "login" => Command::Login {
            email: arg(0, "email")?,
            password: arg(1, "password")?,
        },
        "register" => Command::Register {
            name: arg(0, "name")?,
            email: arg(1, "email")?,
            password: arg(2, "password")?,
        },
        "logout" => Command::Logout,
        other => bail!("unknown command {other}; see --help"),
    };

    Ok(Invocation {
        demo,
        config_file,
        command,
    })
}

pub fn run<I>(args: I) -> Result<()>
where
    I: IntoIterator<Item = String>,
{
    let invocation = parse_args(args)?;
    let cfg = load_config(
        config::LoadOptions {
            config_file: invocation.config_file.clone(),
            env_prefix: None,
        },
        io::stderr,
    )?;
    let global = subscriber(&cfg.log.filter, io::stderr);
    if tracing::subscriber::set_global_default(global).is_err() {
        tracing::debug!("a global subscriber is already installed");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(&cfg, &invocation, &mut out)
}

/// Loads the config under a provisional `warn` subscriber, since
/// `log.filter` is not known until loading finishes.
fn load_config<W>(options: config::LoadOptions, make_writer: W) -> Result<Config>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing::subscriber::with_default(subscriber("warn", make_writer), || config::load(options))
        .context("load config")
}

/// A formatting subscriber; `RUST_LOG` wins over `filter`.
fn subscriber<W>(filter: &str, make_writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(make_writer)
        .finish()
}

pub fn execute(cfg: &Config, invocation: &Invocation, out: &mut dyn Write) -> Result<()> {
    match &invocation.command {
        Command::Login { email, password } => {
            ensure_live(invocation)?;
            let session = auth_flow(cfg)?.login(email, password)?;
            let name = session.name.clone();
            let identity = Identity::anonymous();
            identity.sign_in(session);
            let path = config::save_identity(invocation.config_file.clone(), &identity)?;
            writeln!(out, "Logged in as {name}. Token saved to {}.", path.display())?;
            return Ok(());
        }
        Command::Register {
            name,
            email,
            password,
        } => {
            ensure_live(invocation)?;
            let flow = auth_flow(cfg)?;
            flow.register(name, email, password)?;
            let session = flow.login(email, password)?;
            let name = session.name.clone();
            let identity = Identity::anonymous();
            identity.sign_in(session);
            let path = config::save_identity(invocation.config_file.clone(), &identity)?;
            writeln!(out, "Registered {name}. Token saved to {}.", path.display())?;
            return Ok(());
        }
        Command::Logout => {
            ensure_live(invocation)?;
            let identity = identity_for(cfg.auth.session());
            let name = identity.current_user();
            identity.sign_out();
            let path = config::save_identity(invocation.config_file.clone(), &identity)?;
            match name {
                Some(name) => writeln!(
                    out,
                    "Logged out {name}. Token removed from {}.",
                    path.display()
                )?,
                None => writeln!(out, "Not logged in.")?,
            }
            return Ok(());
        }
        _ => {}
    }

    let (store, identity) = connect(cfg, invocation.demo)?;
    let page_size = cfg.feed.page_size;
    let fetch_limit = cfg.feed.fetch_limit;

    match &invocation.command {
        Command::Feed { search, more } => {
            let mut driver = FeedDriver::new(store, identity, fetch_limit, page_size);
            driver.init();
            driver.settle()?;
            if !search.trim().is_empty() {
                driver.handle(FeedEvent::Search(search.clone()))?;
                driver.settle()?;
            }
            for _ in 0..*more {
                driver.handle(FeedEvent::LoadMore)?;
            }
            print_feed(out, &driver.render())?;
        }
        Command::Posts { name, search, more } => {
            let mut driver = ProfileDriver::new(store, identity, name, fetch_limit, page_size);
            driver.init();
            driver.settle()?;
            if !search.trim().is_empty() {
                driver.handle(ProfileEvent::Search(search.clone()))?;
                driver.settle()?;
            }
            for _ in 0..*more {
                driver.handle(ProfileEvent::LoadMore)?;
            }
            let view = driver.render().context("profile did not load")?;
            print_feed(out, &view.feed)?;
        }
        Command::Profile { name } => {
            let mut driver = ProfileDriver::new(store, identity, name, fetch_limit, page_size);
            driver.init();
            driver.settle()?;
            let view = driver.render().context("profile did not load")?;
            writeln!(out, "{}", view.name)?;
            if !view.email.is_empty() {
                writeln!(out, "{}", view.email)?;
            }
            if let Some(bio) = view.bio.as_deref().filter(|bio| !bio.trim().is_empty()) {
                writeln!(out, "{bio}")?;
            }
            writeln!(
                out,
                "{} posts, {} followers, {} following",
                view.posts, view.followers, view.following
            )?;
            if let Some(follow) = &view.follow {
                writeln!(out, "[{}]", follow.label)?;
            }
            writeln!(out)?;
            print_feed(out, &view.feed)?;
        }
        Command::Follow { name } => {
            let mut driver = ProfileDriver::new(store, identity, name, fetch_limit, page_size);
            driver.init();
            driver.settle()?;
            driver.handle(ProfileEvent::ToggleFollow)?;
            driver.settle()?;
            let follow = driver.follow().context("profile did not load")?;
            let verb = if follow.is_following() {
                "Following"
            } else {
                "No longer following"
            };
            writeln!(out, "{verb} {name}.")?;
        }
        Command::Post { id } => {
            let mut driver = FeedDriver::new(store, identity, fetch_limit, page_size);
            driver.handle(FeedEvent::Post(PostEvent::Open(*id)))?;
            driver.settle()?;
            match driver.post_view(*id).context("post did not load")? {
                RenderedCard::View(card) => print_card(out, &card)?,
                RenderedCard::Edit(_) => bail!("post {id} is being edited"),
            }
        }
        Command::Create { title, body, image } => {
            let mut driver = FeedDriver::new(store, identity, fetch_limit, page_size);
            driver.handle(FeedEvent::Create(PostDraft::new(title, body, image)))?;
            driver.settle()?;
            writeln!(out, "Post created.")?;
            print_feed(out, &driver.render())?;
        }
        Command::Edit {
            id,
            title,
            body,
            image,
        } => {
            let mut driver = FeedDriver::new(store, identity, fetch_limit, page_size);
            driver.handle(FeedEvent::Post(PostEvent::Edit(*id)))?;
            driver.settle()?;
            let mut draft = driver
                .card(*id)
                .and_then(|card| card.draft())
                .cloned()
                .context("post is not being edited")?;
            if let Some(title) = title {
                draft.title = title.clone();
            }
            if let Some(body) = body {
                draft.body = body.clone();
            }
            if let Some(image) = image {
                draft.media_url = image.clone();
            }
            driver.handle(FeedEvent::Post(PostEvent::UpdateDraft(*id, draft)))?;
            driver.handle(FeedEvent::Post(PostEvent::Save(*id)))?;
            driver.settle()?;
            writeln!(out, "Post {id} updated.")?;
        }
        Command::Delete { id, confirmed } => {
            let mut driver = FeedDriver::new(store, identity, fetch_limit, page_size);
            driver.handle(FeedEvent::Post(PostEvent::Open(*id)))?;
            driver.settle()?;
            driver.handle(FeedEvent::Post(PostEvent::RequestDelete(*id)))?;
            if !confirmed {
                driver.handle(FeedEvent::Post(PostEvent::CancelDelete(*id)))?;
                writeln!(out, "Pass --yes to delete post {id}.")?;
                return Ok(());
            }
            driver.handle(FeedEvent::Post(PostEvent::ConfirmDelete(*id)))?;
            driver.settle()?;
            writeln!(out, "Post {id} deleted.")?;
        }
        Command::Login { .. } | Command::Register { .. } | Command::Logout => {}
    }
    Ok(())
}

fn ensure_live(invocation: &Invocation) -> Result<()> {
    if invocation.demo {
        bail!("accounts are not available in demo mode");
    }
    Ok(())
}

fn auth_flow(cfg: &Config) -> Result<auth::Flow> {
    auth::Flow::new(auth::Config {
        base_url: cfg.api.base_url.clone(),
        api_key: cfg.api.api_key.clone(),
        user_agent: cfg.api.user_agent.clone(),
        timeout: cfg.api.timeout,
    })
}

fn identity_for(session: Option<Session>) -> Arc<Identity> {
    Arc::new(session.map_or_else(Identity::anonymous, Identity::with_session))
}

/// Builds the store and the identity it authenticates with.
fn connect(cfg: &Config, demo: bool) -> Result<(Arc<dyn PostStore>, Arc<Identity>)> {
    if demo {
        let session = cfg.auth.session().unwrap_or_else(|| Session {
            name: "ada".into(),
            email: "ada@stud.noroff.no".into(),
            access_token: "demo".into(),
        });
        let identity = identity_for(Some(session));
        let store: Arc<dyn PostStore> = Arc::new(MemoryStore::with_sample_data(identity.clone()));
        return Ok((store, identity));
    }

    let identity = identity_for(cfg.auth.session());
    if cfg.api.api_key.trim().is_empty() {
        tracing::warn!("api.api_key is not set; the API will reject requests");
    }
    let client = social::Client::new(
        identity.clone(),
        social::ClientConfig {
            user_agent: cfg.api.user_agent.clone(),
            api_key: cfg.api.api_key.clone(),
            base_url: Some(cfg.api.base_url.clone()),
            timeout: Some(cfg.api.timeout),
            http_client: None,
        },
    )
    .context("build api client")?;
    Ok((Arc::new(client), identity))
}

fn print_feed(out: &mut dyn Write, view: &FeedView) -> Result<()> {
    if let Some(notice) = &view.notice {
        writeln!(out, "! {notice}")?;
    }
    if let Some(message) = view.status.message() {
        writeln!(out, "{message}")?;
        return Ok(());
    }
    for card in &view.cards {
        if let RenderedCard::View(card) = card {
            print_card(out, card)?;
        }
    }
    if view.show_load_more {
        writeln!(out, "(more posts available: pass --more 1)")?;
    }
    Ok(())
}

fn print_card(out: &mut dyn Write, card: &CardView) -> Result<()> {
    writeln!(out, "#{} {} ({}, {})", card.id, card.title, card.author, card.created)?;
    writeln!(out, "    {}", card.body)?;
    if let Some(image) = &card.image {
        writeln!(out, "    image: {} ({})", image.url, image.alt)?;
    }
    let owner_actions: Vec<&str> = card
        .actions
        .iter()
        .filter_map(|action| match action {
            CardAction::Edit(_) => Some("edit"),
            CardAction::Delete(_) => Some("delete"),
            CardAction::Open(_) | CardAction::ViewAuthor(_) => None,
        })
        .collect();
    if !owner_actions.is_empty() {
        writeln!(out, "    [{}]", owner_actions.join("] ["))?;
    }
    if let Some(notice) = &card.notice {
        writeln!(out, "    ! {notice}")?;
    }
    Ok(())
}
