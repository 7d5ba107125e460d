/// Command-line surface. With no subcommand the binary runs the daemon; the
/// `rules` and `logs` subcommands edit config.json and read the action log
/// directly, and a running daemon picks rule edits up through its config
/// watcher.
use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;

use crate::action_log::LogEntry;
use crate::app::App;
use crate::config::Rule;

#[derive(Debug, Parser)]
#[command(
    name = "switch-input",
    version,
    about = "Switches the input method to follow the focused application"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground (the default)
    Run,
    /// Inspect and edit switching rules
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
    /// Inspect the action log
    Logs {
        #[command(subcommand)]
        action: LogsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// List configured rules with their indices
    List {
        /// Only the enabled rules indexed under exactly this app, by priority
        #[arg(long)]
        app: Option<String>,
    },
    /// Append a rule
    Add(RuleArgs),
    /// Replace the rule at INDEX
    Update {
        index: usize,
        #[command(flatten)]
        rule: RuleArgs,
    },
    /// Remove the rule at INDEX
    Delete { index: usize },
    /// Check the rule at INDEX against the window that has focus now
    Test { index: usize },
}

#[derive(Debug, Args)]
pub struct RuleArgs {
    /// App name or bundle id; comma-separate alternatives
    pub app: String,
    /// Input method id to switch to
    pub input: String,
    /// Window title pattern (empty matches every window)
    #[arg(long, default_value = "")]
    pub window: String,
    /// Lower wins; 0 appends after the existing rules
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,
    #[arg(long)]
    pub disabled: bool,
}

impl From<RuleArgs> for Rule {
    fn from(args: RuleArgs) -> Self {
        Rule {
            enabled: !args.disabled,
            ..Rule::new(&args.app, &args.input, args.priority).with_window(&args.window)
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// Print the most recent entries, oldest first
    Recent {
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
    /// Entry counts per level and the live file size
    Stats,
    /// Empty the live log file
    Clear,
}

fn print_rule(out: &mut impl Write, index: Option<usize>, rule: &Rule) -> Result<()> {
    let slot = index.map(|i| format!("[{i}] ")).unwrap_or_default();
    let window = if rule.window_pattern.is_empty() {
        String::new()
    } else {
        format!(" window~\"{}\"", rule.window_pattern)
    };
    let state = if rule.enabled { "" } else { " (disabled)" };
    writeln!(
        out,
        "{slot}{} -> {} priority={}{window}{state}",
        rule.app_pattern, rule.target_input, rule.priority
    )?;
    Ok(())
}

fn print_entry(out: &mut impl Write, entry: &LogEntry) -> Result<()> {
    write!(
        out,
        "{} {:<5} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        format!("{:?}", entry.level).to_uppercase(),
        entry.message
    )?;
    if let Some(error) = &entry.error {
        write!(out, " ({error})")?;
    }
    writeln!(out)?;
    Ok(())
}

/// Runs a `rules` subcommand against the config behind `app`.
pub fn run_rules(app: &App, action: RulesCommand, out: &mut impl Write) -> Result<()> {
    let matcher = app.matcher();
    matcher.load_config()?;

    match action {
        RulesCommand::List { app: None } => {
            let config = matcher.config()?;
            if config.rules.is_empty() {
                writeln!(out, "No rules configured")?;
            }
            for (i, rule) in config.rules.iter().enumerate() {
                print_rule(out, Some(i), rule)?;
            }
        }
        RulesCommand::List { app: Some(name) } => {
            let rules = matcher.rules_for_app(&name);
            if rules.is_empty() {
                writeln!(out, "No enabled rules for {name}")?;
            }
            for rule in &rules {
                print_rule(out, None, rule)?;
            }
        }
        RulesCommand::Add(args) => {
            matcher.add_rule(args.into())?;
            let config = matcher.config()?;
            let index = config.rules.len() - 1;
            write!(out, "Added ")?;
            print_rule(out, Some(index), &config.rules[index])?;
        }
        RulesCommand::Update { index, rule } => {
            matcher.update_rule(index, rule.into())?;
            write!(out, "Updated ")?;
            print_rule(out, Some(index), &matcher.config()?.rules[index])?;
        }
        RulesCommand::Delete { index } => {
            let removed = matcher.delete_rule(index)?;
            write!(out, "Deleted ")?;
            print_rule(out, Some(index), &removed)?;
        }
        RulesCommand::Test { index } => {
            let config = matcher.config()?;
            let Some(rule) = config.rules.get(index) else {
                bail!("rule index {index} out of range ({} rules)", config.rules.len());
            };
            let (matched, window) = app.test_rule(rule)?;
            writeln!(
                out,
                "{} for {} \"{}\" (pid {})",
                if matched { "Match" } else { "No match" },
                window.app_name,
                window.window_name,
                window.pid
            )?;
        }
    }
    Ok(())
}

/// Runs a `logs` subcommand against the action log behind `app`.
pub fn run_logs(app: &App, action: LogsCommand, out: &mut impl Write) -> Result<()> {
    let log = app.log();
    match action {
        LogsCommand::Recent { limit } => {
            for entry in log.recent_entries(limit)? {
                print_entry(out, &entry)?;
            }
        }
        LogsCommand::Stats => {
            let stats = log.stats()?;
            writeln!(out, "entries: {}", stats.total_entries)?;
            writeln!(out, "debug:   {}", stats.debug_count)?;
            writeln!(out, "info:    {}", stats.info_count)?;
            writeln!(out, "warn:    {}", stats.warn_count)?;
            writeln!(out, "error:   {}", stats.error_count)?;
            writeln!(out, "size:    {} bytes", stats.file_size)?;
        }
        LogsCommand::Clear => {
            log.clear()?;
            writeln!(out, "Cleared {}", log.path().display())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_log::{ActionLog, LogSettings};
    use crate::error::{ObservationError, SwitchError};
    use crate::matcher::RuleMatcher;
    use crate::platform::{InputSwitcher, WindowSource};
    use crate::window_monitor::WindowObservation;
    use std::sync::Arc;
    use tokio::time::Duration;

    struct Focused(&'static str);

    impl WindowSource for Focused {
        fn active_window(&self) -> Result<WindowObservation, ObservationError> {
            Ok(WindowObservation {
                app_name: self.0.to_string(),
                app_path: String::new(),
                window_name: "main".to_string(),
                pid: 9,
            })
        }
    }

    struct NoSwitch;

    impl InputSwitcher for NoSwitch {
        fn current_input(&self) -> Result<String, SwitchError> {
            Err(SwitchError::Unsupported(std::env::consts::OS))
        }

        fn switch_input(&self, _input_id: &str) -> Result<(), SwitchError> {
            Err(SwitchError::Unsupported(std::env::consts::OS))
        }
    }

    fn app(dir: &tempfile::TempDir) -> App {
        App::new(
            Arc::new(RuleMatcher::new(dir.path().join("config.json"))),
            Arc::new(ActionLog::new(
                dir.path().join("logs").join("app.log"),
                LogSettings::default(),
            )),
            Arc::new(Focused("Safari")),
            Arc::new(NoSwitch),
            Duration::from_secs(1),
            dir.path().join("status.toml"),
        )
    }

    fn rules(app: &App, action: RulesCommand) -> String {
        let mut out = Vec::new();
        run_rules(app, action, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn logs(app: &App, action: LogsCommand) -> String {
        let mut out = Vec::new();
        run_logs(app, action, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args.iter().copied()).unwrap().command.unwrap()
    }

    // ── parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn no_subcommand_means_run() {
        assert!(Cli::try_parse_from(["switch-input"]).unwrap().command.is_none());
    }

    #[test]
    fn rules_add_parses_options() {
        let Command::Rules {
            action: RulesCommand::Add(args),
        } = parse(&[
            "switch-input", "rules", "add", "Slack,Discord", "abc", "--window", "Huddle",
            "--priority", "-2", "--disabled",
        ])
        else {
            panic!("expected rules add");
        };
        let rule = Rule::from(args);
        assert_eq!(rule.app_pattern, "Slack,Discord");
        assert_eq!(rule.window_pattern, "Huddle");
        assert_eq!(rule.priority, -2);
        assert!(!rule.enabled);
    }

    #[test]
    fn logs_recent_defaults_to_fifty() {
        assert!(matches!(
            parse(&["switch-input", "logs", "recent"]),
            Command::Logs {
                action: LogsCommand::Recent { limit: 50 }
            }
        ));
    }

    // ── rules ─────────────────────────────────────────────────────────────────

    #[test]
    fn list_writes_default_rules_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let out = rules(&app, RulesCommand::List { app: None });
        assert!(out.starts_with("[0] "));
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn add_update_delete_edit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let before = {
            app.matcher().load_config().unwrap();
            app.matcher().config().unwrap().rules.len()
        };

        let out = rules(
            &app,
            RulesCommand::Add(RuleArgs {
                app: "Slack".into(),
                input: "abc".into(),
                window: String::new(),
                priority: 0,
                disabled: false,
            }),
        );
        assert!(out.contains(&format!("[{before}] Slack -> abc priority={}", before + 1)));

        rules(
            &app,
            RulesCommand::Update {
                index: before,
                rule: RuleArgs {
                    app: "Slack".into(),
                    input: "pinyin".into(),
                    window: String::new(),
                    priority: 7,
                    disabled: false,
                },
            },
        );
        let by_app = rules(&app, RulesCommand::List { app: Some("Slack".into()) });
        assert_eq!(by_app.trim(), "Slack -> pinyin priority=7");

        let out = rules(&app, RulesCommand::Delete { index: before });
        assert!(out.starts_with("Deleted "));
        let on_disk = crate::config::read_config(app.matcher().config_path())
            .unwrap()
            .unwrap();
        assert_eq!(on_disk.rules.len(), before);
    }

    #[test]
    fn delete_out_of_range_fails() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let mut out = Vec::new();
        assert!(run_rules(&app, RulesCommand::Delete { index: 999 }, &mut out).is_err());
    }

    #[test]
    fn test_reports_match_against_focused_window() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        rules(
            &app,
            RulesCommand::Add(RuleArgs {
                app: "Safari".into(),
                input: "pinyin".into(),
                window: String::new(),
                priority: -1,
                disabled: false,
            }),
        );
        let index = app.matcher().config().unwrap().rules.len() - 1;
        let out = rules(&app, RulesCommand::Test { index });
        assert!(out.starts_with("Match for Safari"));
    }

    // ── logs ──────────────────────────────────────────────────────────────────

    #[test]
    fn logs_recent_stats_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        app.log().info("first");
        app.log().error("second");
        app.log().flush().unwrap();

        let recent = logs(&app, LogsCommand::Recent { limit: 1 });
        assert!(recent.contains("ERROR"));
        assert!(recent.contains("second"));
        assert!(!recent.contains("first"));

        let stats = logs(&app, LogsCommand::Stats);
        assert!(stats.contains("entries: 2"));
        assert!(stats.contains("error:   1"));

        logs(&app, LogsCommand::Clear);
        assert!(logs(&app, LogsCommand::Recent { limit: 10 }).is_empty());
    }
}
