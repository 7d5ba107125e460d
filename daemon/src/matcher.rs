/// Rule matching: owns the live [`Config`], keeps a priority-ordered index of
/// its enabled rules, and resolves a window observation to at most one rule.
///
/// Resolution runs in two phases:
///   1. exact: the observation's app name is looked up verbatim in the index;
///   2. fuzzy: every index key, in ascending lexicographic order, is compared
///      against the app name (case-insensitive equality, containment in either
///      direction, or containment of any whitespace-separated word of the key).
///
/// Within a key, rules are tried lowest priority value first; the first one
/// whose window pattern accepts the window title wins.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{self, Config, Rule};
use crate::error::ConfigError;
use crate::window_monitor::WindowObservation;

/// Enabled rules grouped by app-name token, each group sorted ascending by
/// priority. Ties keep their order from the config.
#[derive(Debug, Default, Clone)]
pub struct RuleIndex {
    by_app: BTreeMap<String, Vec<Rule>>,
}

impl RuleIndex {
    pub fn build(rules: &[Rule]) -> Self {
        let mut by_app: BTreeMap<String, Vec<Rule>> = BTreeMap::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            for token in rule.app_pattern.split(',').map(str::trim) {
                if !token.is_empty() {
                    by_app.entry(token.to_string()).or_default().push(rule.clone());
                }
            }
        }
        for group in by_app.values_mut() {
            // `sort_by_key` is stable.
            group.sort_by_key(|r| r.priority);
        }
        Self { by_app }
    }

    pub fn get(&self, app: &str) -> Option<&[Rule]> {
        self.by_app.get(app).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_app.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_app.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_app.is_empty()
    }

    /// Resolves `window` against the index. See the module docs for the
    /// two-phase policy.
    pub fn resolve(&self, window: &WindowObservation) -> Option<&Rule> {
        if window.app_name.trim().is_empty() {
            return None;
        }

        if let Some(rule) = self
            .by_app
            .get(&window.app_name)
            .and_then(|rules| first_window_match(rules, &window.window_name))
        {
            return Some(rule);
        }

        self.by_app
            .iter()
            .filter(|(key, _)| app_name_matches(&window.app_name, key))
            .find_map(|(_, rules)| first_window_match(rules, &window.window_name))
    }
}

fn first_window_match<'a>(rules: &'a [Rule], window_name: &str) -> Option<&'a Rule> {
    rules
        .iter()
        .find(|r| window_name_matches(window_name, &r.window_pattern))
}

/// Loose app-name comparison used by the fuzzy phase.
pub fn app_name_matches(current: &str, rule_app: &str) -> bool {
    let current = current.trim().to_lowercase();
    let rule_app = rule_app.trim().to_lowercase();

    if current == rule_app {
        return true;
    }
    if current.contains(&rule_app) || rule_app.contains(&current) {
        return true;
    }
    rule_app
        .split_whitespace()
        .any(|word| current.contains(word))
}

/// Case-insensitive substring test of the window title against `pattern`.
/// An empty pattern accepts everything; `*` is tolerated by dropping it.
pub fn window_name_matches(current: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let current = current.trim().to_lowercase();
    let pattern = pattern.trim().to_lowercase();

    if pattern.contains('*') {
        return current.contains(&pattern.replace('*', ""));
    }
    current.contains(&pattern)
}

struct MatcherState {
    config: Option<Config>,
    index: RuleIndex,
}

/// Owner of the config lifecycle and the rule index it feeds.
///
/// Reads (`match_window`, `config`, `rules_for_app`) share the lock; loads and
/// saves hold it exclusively while the file is written and the new index is
/// swapped in, so the in-memory config never disagrees with the file.
pub struct RuleMatcher {
    config_path: PathBuf,
    state: RwLock<MatcherState>,
}

impl RuleMatcher {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state: RwLock::new(MatcherState {
                config: None,
                index: RuleIndex::default(),
            }),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MatcherState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MatcherState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads the config file, writing the built-in default rule set first if
    /// none exists. On error the previously loaded config stays live.
    pub fn load_config(&self) -> Result<(), ConfigError> {
        let mut state = self.write_state();

        let config = match config::read_config(&self.config_path)? {
            Some(config) => config,
            None => {
                tracing::info!(
                    "No config at {}; writing default rules",
                    self.config_path.display()
                );
                let mut config = config::default_config();
                stamp(&mut config);
                config::write_config(&self.config_path, &config)?;
                config
            }
        };

        state.index = RuleIndex::build(&config.rules);
        state.config = Some(config);
        tracing::debug!("Loaded {} rules", state.index.len());
        Ok(())
    }

    pub fn reload_config(&self) -> Result<(), ConfigError> {
        self.load_config()
    }

    /// Stamps `config.last_modified`, overwrites the file, then makes `config`
    /// live and rebuilds the index. Nothing changes if the write fails.
    pub fn save_config(&self, mut config: Config) -> Result<(), ConfigError> {
        stamp(&mut config);
        let index = RuleIndex::build(&config.rules);

        let mut state = self.write_state();
        config::write_config(&self.config_path, &config)?;
        state.config = Some(config);
        state.index = index;
        Ok(())
    }

    /// Snapshot of the live config.
    pub fn config(&self) -> Result<Config, ConfigError> {
        self.read_state().config.clone().ok_or(ConfigError::NotLoaded)
    }

    /// Appends `rule`. A zero priority is replaced with `len + 1`.
    pub fn add_rule(&self, mut rule: Rule) -> Result<(), ConfigError> {
        let mut config = self.config()?;
        if rule.priority == 0 {
            rule.priority = next_priority(config.rules.len());
        }
        config.rules.push(rule);
        self.save_config(config)
    }

    pub fn update_rule(&self, index: usize, rule: Rule) -> Result<(), ConfigError> {
        let mut config = self.config()?;
        check_index(index, config.rules.len())?;
        config.rules[index] = rule;
        self.save_config(config)
    }

    /// Removes and returns the rule at `index`.
    pub fn delete_rule(&self, index: usize) -> Result<Rule, ConfigError> {
        let mut config = self.config()?;
        check_index(index, config.rules.len())?;
        let removed = config.rules.remove(index);
        self.save_config(config)?;
        Ok(removed)
    }

    pub fn match_window(&self, window: &WindowObservation) -> Option<Rule> {
        self.read_state().index.resolve(window).cloned()
    }

    /// Enabled rules indexed under exactly `app`, in priority order.
    pub fn rules_for_app(&self, app: &str) -> Vec<Rule> {
        self.read_state()
            .index
            .get(app)
            .map(<[Rule]>::to_vec)
            .unwrap_or_default()
    }
}

/// Priority given to a rule appended after `len` others, clamped to `i32`.
fn next_priority(len: usize) -> i32 {
    i32::try_from(len).map_or(i32::MAX, |len| len.saturating_add(1))
}

fn check_index(index: usize, len: usize) -> Result<(), ConfigError> {
    if index >= len {
        return Err(ConfigError::IndexOutOfRange { index, len });
    }
    Ok(())
}

fn stamp(config: &mut Config) {
    config.last_modified = chrono::Local::now().to_rfc3339();
}
