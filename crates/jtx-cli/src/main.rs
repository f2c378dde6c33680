use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jtx::dom::NodeId;
use jtx::host::{
    FileStorage, Host, HttpClient, HttpRequest, HttpResponse, MemoryStorage, MemoryStreams,
    MemoryUrl, RequestId,
};
use jtx::Engine;

#[derive(Parser)]
#[command(name = "jtx")]
#[command(about = "Headless runner for jtx documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an HTML file, run the engine, print the rendered document
    Run {
        /// Path to the .html file
        file: PathBuf,
        /// Number of one-second turns to simulate
        #[arg(long, default_value_t = 1)]
        ticks: u64,
        /// Directory for persisted state (in-memory when omitted)
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Directory serving HTTP fixtures (URL path -> file)
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
    /// Compile every expression in a document and report diagnostics
    Check {
        /// Path to the .html file
        file: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run {
            file,
            ticks,
            state_dir,
            fixtures,
        } => run(&file, ticks, state_dir, fixtures),
        Commands::Check { file } => check(&file),
    };
    if let Err(error) = outcome {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

/// Serves source fetches and handler HTTP helpers from local files:
/// `GET /api/items` reads `<fixtures>/api/items`.
struct FixtureHttp {
    base: Option<PathBuf>,
    next_id: RequestId,
    pending: Vec<(RequestId, HttpRequest)>,
}

impl FixtureHttp {
    fn new(base: Option<PathBuf>) -> Self {
        Self {
            base,
            next_id: 0,
            pending: Vec::new(),
        }
    }

    fn lookup(&self, url: &str) -> Result<HttpResponse, String> {
        let Some(base) = &self.base else {
            return Err(format!("no fixture directory for {url}"));
        };
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let relative = path.trim_start_matches('/');
        match fs::read_to_string(base.join(relative)) {
            Ok(body) => Ok(HttpResponse { status: 200, body }),
            Err(_) => Ok(HttpResponse {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

impl HttpClient for FixtureHttp {
    fn begin(&mut self, request: HttpRequest) -> RequestId {
        self.next_id += 1;
        self.pending.push((self.next_id, request));
        self.next_id
    }

    fn take_pending(&mut self) -> Vec<(RequestId, HttpRequest)> {
        std::mem::take(&mut self.pending)
    }

    fn try_complete(&mut self, request: &HttpRequest) -> Option<Result<HttpResponse, String>> {
        Some(self.lookup(&request.url))
    }

    fn perform(&mut self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.lookup(&request.url)
    }
}

fn run(
    file: &Path,
    ticks: u64,
    state_dir: Option<PathBuf>,
    fixtures: Option<PathBuf>,
) -> Result<()> {
    let markup = fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let storage: Box<dyn jtx::host::Storage> = match state_dir {
        Some(dir) => Box::new(FileStorage::new(dir)),
        None => Box::new(MemoryStorage::default()),
    };
    let host = Host {
        storage,
        http: Box::new(FixtureHttp::new(fixtures)),
        streams: Box::new(MemoryStreams::default()),
        url: Box::new(MemoryUrl::default()),
    };

    let mut engine = Engine::from_html(&markup, host);
    for _ in 0..ticks {
        engine.pump_http();
        engine.advance_time(1_000);
    }
    engine.pump_http();

    println!("{}", engine.to_html());

    let events = engine.take_events();
    if !events.is_empty() {
        log::info!("{} events emitted", events.len());
        for event in events {
            log::debug!("event {} detail {}", event.name, event.detail);
        }
    }
    Ok(())
}

fn check(file: &Path) -> Result<()> {
    let markup = fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let doc = jtx::dom::html::load_document(&markup);

    let mut problems = 0usize;
    let mut walk: Vec<NodeId> = vec![doc.root()];
    while let Some(node) = walk.pop() {
        for child in doc.children(node) {
            walk.push(child);
        }
        if !doc.is_element(node) {
            continue;
        }
        for (attr_name, attr_value) in doc.attrs(node) {
            let Some(directive) = attr_name.strip_prefix("jtx-") else {
                continue;
            };
            let result = match directive {
                "on" => {
                    let mut failure = None;
                    for entry in jtx::engine::on_attr::parse_on_attribute(&attr_value) {
                        if let Err(error) = jtx::expr::compile_statements(&entry.code) {
                            failure = Some(error);
                            break;
                        }
                    }
                    match failure {
                        Some(error) => Err(error),
                        None => Ok(()),
                    }
                }
                "key" => Ok(()),
                _ => jtx::expr::compile_expression(&attr_value).map(|_| ()),
            };
            if let Err(error) = result {
                problems += 1;
                eprintln!("{attr_name}=\"{attr_value}\": {error}");
            }
        }
    }

    if problems > 0 {
        anyhow::bail!("{problems} invalid expression(s)");
    }
    println!("ok");
    Ok(())
}
