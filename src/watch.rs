use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::{
    config::Settings,
    dashboard::{Change, Dashboard, Direction, Row, Ticket, Trigger},
    market::MarketSnapshot,
};

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const CLEAR: &str = "\x1b[2J\x1b[H";

const NAME_W: usize = 22;
const SYMBOL_W: usize = 8;
const PRICE_W: usize = 18;
const CHANGE_W: usize = 12;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend status {0}")]
    Status(StatusCode),
}

/// HTTP handle on the CoinPulse server.
#[derive(Clone)]
pub struct Backend {
    http: reqwest::Client,
    markets_url: String,
}

impl Backend {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("coinpulse-watch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build backend http client")?;
        Ok(Self {
            http,
            markets_url: format!("{}/api/markets", base_url.trim_end_matches('/')),
        })
    }

    pub async fn fetch_markets(&self) -> Result<Vec<MarketSnapshot>, BackendError> {
        let response = self.http.get(&self.markets_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status));
        }
        Ok(response.json::<Vec<MarketSnapshot>>().await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Filter(String),
    Quit,
    Help,
}

impl Command {
    /// `r` refresh, `/text` filter (`/` alone clears), `q` quit.
    pub fn parse(line: &str) -> Command {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(text) = line.strip_prefix('/') {
            return Command::Filter(text.to_string());
        }
        match line.trim() {
            "r" | "refresh" => Command::Refresh,
            "q" | "quit" | "exit" => Command::Quit,
            _ => Command::Help,
        }
    }
}

type Completion = (Ticket, Result<Vec<MarketSnapshot>, BackendError>);

fn start_fetch(dash: &mut Dashboard, trigger: Trigger, backend: &Backend, tx: &mpsc::Sender<Completion>) {
    let Some(ticket) = dash.begin_fetch(trigger) else {
        return;
    };
    let backend = backend.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = backend.fetch_markets().await;
        let _ = tx.send((ticket, result)).await;
    });
}

/// Polls the backend and redraws the table until `q` or end of input.
pub async fn run(settings: Settings) -> Result<()> {
    let backend = Backend::new(&settings.backend_url)?;
    let mut dash = Dashboard::new();
    let (tx, mut rx) = mpsc::channel::<Completion>(4);

    let mut poll = tokio::time::interval(Duration::from_secs(settings.poll_interval_secs));
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut mounted = false;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut out = std::io::stdout();

    log::info!(
        "watch.start backend={} poll_secs={}",
        settings.backend_url,
        settings.poll_interval_secs
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let trigger = if mounted { Trigger::Timer } else { Trigger::Mount };
                mounted = true;
                start_fetch(&mut dash, trigger, &backend, &tx);
            }
            Some((ticket, result)) = rx.recv() => {
                dash.finish_fetch(ticket, result);
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("read stdin")? {
                    None => stdin_open = false,
                    Some(l) => match Command::parse(&l) {
                        Command::Quit => break,
                        Command::Refresh => start_fetch(&mut dash, Trigger::Manual, &backend, &tx),
                        Command::Filter(text) => dash.set_filter(text),
                        Command::Help => {}
                    },
                }
            }
        }

        write!(out, "{CLEAR}{}", render_text(&dash, &settings.backend_url)).context("write stdout")?;
        out.flush().context("flush stdout")?;
    }

    log::info!("watch.stop");
    Ok(())
}

fn pad(s: &str, width: usize) -> String {
    let n = s.chars().count();
    if n >= width {
        s.chars().take(width).collect()
    } else {
        format!("{s}{}", " ".repeat(width - n))
    }
}

fn pad_left(s: &str, width: usize) -> String {
    let n = s.chars().count();
    if n >= width {
        s.to_string()
    } else {
        format!("{}{s}", " ".repeat(width - n))
    }
}

/// OSC 8 hyperlink; terminals without support print `text` only.
fn link(url: &str, text: &str) -> String {
    if url.is_empty() {
        return text.to_string();
    }
    format!("\x1b]8;;{url}\x1b\\{text}\x1b]8;;\x1b\\")
}

/// Full screen for the current state.
pub fn render_text(dash: &Dashboard, backend_url: &str) -> String {
    let mut s = String::new();
    let synced = dash
        .last_synced()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    let status = if dash.is_loading() {
        "syncing"
    } else if dash.last_error().is_some() {
        "disconnected"
    } else {
        "live"
    };

    s.push_str(&format!("{BOLD}CoinPulse Terminal{RESET}  [{}]\n", dash.refresh_label()));
    s.push_str(&format!(
        "{DIM}Live Market Analytics • {status} • synced {synced}{RESET}\n\n"
    ));
    s.push_str(&format!(
        "Search: {}  {DIM}({} of {} assets){RESET}\n\n",
        dash.filter_text(),
        dash.visible().len(),
        dash.records().len()
    ));

    if let Some(err) = dash.last_error() {
        s.push_str(&format!(
            "{RED}{err} - Ensure the CoinPulse server is reachable at {backend_url}.{RESET}\n\n"
        ));
    }

    let width = NAME_W + SYMBOL_W + PRICE_W + CHANGE_W;
    s.push_str(&format!(
        "{DIM}{}{}{}{}{RESET}\n",
        pad("ASSET", NAME_W),
        pad("", SYMBOL_W),
        pad_left("PRICE (USD)", PRICE_W),
        pad_left("24H CHANGE", CHANGE_W)
    ));
    s.push_str(&format!("{DIM}{}{RESET}\n", "─".repeat(width)));

    for row in dash.rows() {
        match row {
            Row::Placeholder => s.push_str(&format!("{DIM}{}{RESET}\n", "░".repeat(width))),
            Row::NoResults { filter } => {
                s.push_str(&format!("{DIM}No assets found matching \"{filter}\"{RESET}\n"))
            }
            Row::Coin(c) => {
                let (color, change) = match &c.change {
                    Change::Known {
                        direction: Direction::Up,
                        text,
                    } => (GREEN, format!("▲ {text}")),
                    Change::Known {
                        direction: Direction::Down,
                        text,
                    } => (RED, format!("▼ {text}")),
                    Change::Unknown => (DIM, "--".to_string()),
                };
                s.push_str(&format!(
                    "{BOLD}{}{RESET}{DIM}{}{RESET}{}{color}{}{RESET}\n",
                    pad(c.name, NAME_W),
                    link(c.icon, &pad(c.symbol, SYMBOL_W)),
                    pad_left(&format!("${}", c.price), PRICE_W),
                    pad_left(&change, CHANGE_W)
                ));
            }
        }
    }

    s.push_str(&format!("\n{DIM}r refresh • /text filter • / clear • q quit{RESET}\n"));
    s
}
