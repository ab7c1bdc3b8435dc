//! Research commands and their text syntax.
//!
//! The HTTP surface accepts chat-style commands such as `/research more 3`;
//! the CLI builds the same [`Command`] values from clap subcommands.
//!
//! | Text | Command |
//! |------|---------|
//! | `/research <query>` or `/research new <query>` | [`ResearchCommand::New`] |
//! | `/research more [n]` | [`ResearchCommand::More`] |
//! | `/research iterate [n]` | [`ResearchCommand::Iterate`] |
//! | `/research combine [n]` | [`ResearchCommand::Combine`] |
//! | `/research auto [n]` | [`ResearchCommand::Auto`] |
//! | `/research deeper` | [`ResearchCommand::Deeper`] |
//! | `/research view [main\|base\|combined\|stats]` | [`ResearchCommand::View`] |
//! | `/research set-query <q>` | [`ResearchCommand::SetQuery`] |
//! | `/research set-report-type <t>` | [`ResearchCommand::SetReportType`] |
//! | `/research set-search-queries <q1>; <q2>` | [`ResearchCommand::SetSearchQueries`] |
//! | `/research heatseek [query]` | [`Command::Heatseek`] |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which reports VIEW shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewTarget {
    #[default]
    Main,
    Base,
    Combined,
    Stats,
}

impl FromStr for ViewTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(ViewTarget::Main),
            "base" => Ok(ViewTarget::Base),
            "combined" => Ok(ViewTarget::Combined),
            "stats" => Ok(ViewTarget::Stats),
            other => Err(format!(
                "Unknown view '{}'. Use one of: main, base, combined, stats.",
                other
            )),
        }
    }
}

/// One research-mode command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ResearchCommand {
    New {
        query: String,
        #[serde(default)]
        report_type: Option<String>,
    },
    More {
        #[serde(default = "one")]
        num_iterations: usize,
    },
    Iterate {
        #[serde(default = "one")]
        num_iterations: usize,
    },
    Combine {
        #[serde(default = "one")]
        num_iterations: usize,
    },
    Auto {
        #[serde(default = "one")]
        num_iterations: usize,
    },
    Deeper,
    View {
        #[serde(default)]
        target: ViewTarget,
    },
    SetQuery {
        query: String,
    },
    SetReportType {
        report_type: String,
    },
    SetSearchQueries {
        queries: Vec<String>,
    },
    /// No action; replies with usage help.
    None,
}

fn one() -> usize {
    1
}

impl ResearchCommand {
    /// Steps requested for one turn (1 for single-shot commands).
    pub fn num_iterations(&self) -> usize {
        match self {
            ResearchCommand::More { num_iterations }
            | ResearchCommand::Iterate { num_iterations }
            | ResearchCommand::Combine { num_iterations }
            | ResearchCommand::Auto { num_iterations } => (*num_iterations).max(1),
            _ => 1,
        }
    }
}

impl fmt::Display for ResearchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResearchCommand::New { .. } => "new",
            ResearchCommand::More { .. } => "more",
            ResearchCommand::Iterate { .. } => "iterate",
            ResearchCommand::Combine { .. } => "combine",
            ResearchCommand::Auto { .. } => "auto",
            ResearchCommand::Deeper => "deeper",
            ResearchCommand::View { .. } => "view",
            ResearchCommand::SetQuery { .. } => "set-query",
            ResearchCommand::SetReportType { .. } => "set-report-type",
            ResearchCommand::SetSearchQueries { .. } => "set-search-queries",
            ResearchCommand::None => "none",
        };
        f.write_str(name)
    }
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Research(ResearchCommand),
    /// Start (with a query) or continue (without) a heatseek session.
    Heatseek { query: Option<String> },
}

pub const USAGE: &str = "Usage: /research <query> | new <query> | more [n] | iterate [n] | \
combine [n] | auto [n] | deeper | view [main|base|combined|stats] | set-query <q> | \
set-report-type <t> | set-search-queries <q1>; <q2> | heatseek [query]";

fn parse_count(arg: &str, sub: &str) -> Result<usize, String> {
    if arg.is_empty() {
        return Ok(1);
    }
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!(
            "'{}' expects a positive number of iterations, got '{}'.",
            sub, arg
        )),
    }
}

fn require<'a>(arg: &'a str, sub: &str) -> Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("'{}' needs an argument. {}", sub, USAGE))
    } else {
        Ok(arg)
    }
}

/// Parse `/research ...` text. Errors are guidance messages for the user.
pub fn parse_command(text: &str) -> Result<Command, String> {
    let text = text.trim();
    let body = text
        .strip_prefix("/research")
        .ok_or_else(|| format!("Commands start with /research. {}", USAGE))?;
    if !body.is_empty() && !body.starts_with(char::is_whitespace) {
        return Err(format!("Unknown command. {}", USAGE));
    }
    let body = body.trim();
    if body.is_empty() {
        return Ok(Command::Research(ResearchCommand::None));
    }

    let (sub, arg) = match body.split_once(char::is_whitespace) {
        Some((s, a)) => (s, a.trim()),
        None => (body, ""),
    };
    let cmd = match sub.to_ascii_lowercase().as_str() {
        "new" => ResearchCommand::New {
            query: require(arg, sub)?.to_string(),
            report_type: None,
        },
        "more" => ResearchCommand::More {
            num_iterations: parse_count(arg, sub)?,
        },
        "iterate" => ResearchCommand::Iterate {
            num_iterations: parse_count(arg, sub)?,
        },
        "combine" => ResearchCommand::Combine {
            num_iterations: parse_count(arg, sub)?,
        },
        "auto" => ResearchCommand::Auto {
            num_iterations: parse_count(arg, sub)?,
        },
        "deeper" => ResearchCommand::Deeper,
        "view" => ResearchCommand::View {
            target: if arg.is_empty() {
                ViewTarget::Main
            } else {
                arg.parse()?
            },
        },
        "set-query" => ResearchCommand::SetQuery {
            query: require(arg, sub)?.to_string(),
        },
        "set-report-type" => ResearchCommand::SetReportType {
            report_type: require(arg, sub)?.to_string(),
        },
        "set-search-queries" => {
            let queries: Vec<String> = require(arg, sub)?
                .split(';')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(String::from)
                .collect();
            ResearchCommand::SetSearchQueries { queries }
        }
        "heatseek" => {
            return Ok(Command::Heatseek {
                query: (!arg.is_empty()).then(|| arg.to_string()),
            })
        }
        _ => ResearchCommand::New {
            query: body.to_string(),
            report_type: None,
        },
    };
    Ok(Command::Research(cmd))
}
