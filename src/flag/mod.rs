//! Flag registry and applier
//!
//! A [`Flag`] couples a command-line setting with a typed setter that writes
//! into [`Values`]. Flags are registered once into a [`FlagSet`], bound to a
//! clap command, and after parsing, [`apply_all`] runs the setters of every
//! flag that was explicitly set.
//!
//! # Ordering
//!
//! Setters run in two passes: [`Precedence::Profile`] flags first, then
//! [`Precedence::Setting`] flags, each pass in registration order. A profile
//! flag (`--ha`) rewrites many settings at once, so the individual flags that
//! express the same settings must apply after it to win.

pub mod catalog;
pub mod options;

use std::time::Duration;

use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{debug, warn};

use crate::values::duration::{format_duration, parse_duration};
use crate::values::Values;
use crate::{Error, Result};

/// Typed setter writing a parsed flag value into the tree
pub type Setter<T> = fn(&mut Values, T) -> Result<()>;

/// The declared type of a flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    /// `true` / `false`; a bare `--flag` means `true`
    Bool,
    /// Free-form text
    String,
    /// Signed integer
    Int,
    /// Unsigned integer
    Uint,
    /// Go-style duration (`24h`, `1m30s`)
    Duration,
    /// Comma-separated or repeated list
    StringList,
}

/// A parsed flag value
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    /// Boolean
    Bool(bool),
    /// Text
    String(String),
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    Uint(u64),
    /// Duration
    Duration(Duration),
    /// List of strings
    StringList(Vec<String>),
}

impl FlagValue {
    fn kind(&self) -> FlagKind {
        match self {
            Self::Bool(_) => FlagKind::Bool,
            Self::String(_) => FlagKind::String,
            Self::Int(_) => FlagKind::Int,
            Self::Uint(_) => FlagKind::Uint,
            Self::Duration(_) => FlagKind::Duration,
            Self::StringList(_) => FlagKind::StringList,
        }
    }
}

impl std::fmt::Display for FlagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Uint(v) => write!(f, "{}", v),
            Self::Duration(v) => write!(f, "{}", format_duration(*v)),
            Self::StringList(v) => write!(f, "{}", v.join(",")),
        }
    }
}

/// When a flag applies relative to others
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// Rewrites a group of settings; applies before any [`Precedence::Setting`]
    Profile,
    /// Sets individual settings
    Setting,
}

#[derive(Clone, Copy)]
enum Apply {
    Bool(Setter<bool>),
    String(Setter<String>),
    Int(Setter<i64>),
    Uint(Setter<u64>),
    Duration(Setter<Duration>),
    StringList(Setter<Vec<String>>),
    Unsupported(&'static str),
}

/// A registered command-line setting
#[derive(Clone)]
pub struct Flag {
    name: &'static str,
    short: Option<char>,
    help: &'static str,
    default: FlagValue,
    apply: Apply,
    precedence: Precedence,
    deprecation: Option<&'static str>,
    hidden: bool,
    env: Option<&'static str>,
    value: Option<FlagValue>,
}

impl std::fmt::Debug for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flag")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("precedence", &self.precedence)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Flag {
    fn new(name: &'static str, help: &'static str, default: FlagValue, apply: Apply) -> Self {
        Self {
            name,
            short: None,
            help,
            default,
            apply,
            precedence: Precedence::Setting,
            deprecation: None,
            hidden: false,
            env: None,
            value: None,
        }
    }

    /// Register a boolean flag
    pub fn bool(name: &'static str, default: bool, help: &'static str, set: Setter<bool>) -> Self {
        Self::new(name, help, FlagValue::Bool(default), Apply::Bool(set))
    }

    /// Register a string flag
    pub fn string(
        name: &'static str,
        default: impl Into<String>,
        help: &'static str,
        set: Setter<String>,
    ) -> Self {
        Self::new(name, help, FlagValue::String(default.into()), Apply::String(set))
    }

    /// Register a signed integer flag
    pub fn int(name: &'static str, default: i64, help: &'static str, set: Setter<i64>) -> Self {
        Self::new(name, help, FlagValue::Int(default), Apply::Int(set))
    }

    /// Register an unsigned integer flag
    pub fn uint(name: &'static str, default: u64, help: &'static str, set: Setter<u64>) -> Self {
        Self::new(name, help, FlagValue::Uint(default), Apply::Uint(set))
    }

    /// Register a duration flag
    pub fn duration(
        name: &'static str,
        default: Duration,
        help: &'static str,
        set: Setter<Duration>,
    ) -> Self {
        Self::new(name, help, FlagValue::Duration(default), Apply::Duration(set))
    }

    /// Register a string-list flag
    pub fn string_list(
        name: &'static str,
        default: Vec<String>,
        help: &'static str,
        set: Setter<Vec<String>>,
    ) -> Self {
        Self::new(name, help, FlagValue::StringList(default), Apply::StringList(set))
    }

    /// Register a legacy flag that is still accepted by the parser but fails
    /// with `message` whenever it is given.
    pub fn unsupported(name: &'static str, help: &'static str, message: &'static str) -> Self {
        let mut flag = Self::new(name, help, FlagValue::Bool(false), Apply::Unsupported(message));
        flag.hidden = true;
        flag
    }

    /// Apply before individual settings
    pub fn profile(mut self) -> Self {
        self.precedence = Precedence::Profile;
        self
    }

    /// Single-character alias
    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    /// Keep accepting the flag but warn with `note` when it is used
    pub fn deprecated(mut self, note: &'static str) -> Self {
        self.deprecation = Some(note);
        self
    }

    /// Hide from `--help`
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Pre-seed the flag from an environment variable.
    ///
    /// The variable is read now, at registration. An explicit command-line
    /// value still overrides it.
    pub fn env(mut self, var: &'static str) -> Self {
        self.env = Some(var);
        let seeded = std::env::var(var).ok();
        self.preseed(seeded)
    }

    fn preseed(mut self, raw: Option<String>) -> Self {
        if let Some(raw) = raw.filter(|v| !v.is_empty()) {
            match self.parse(&raw) {
                Ok(value) => {
                    debug!(flag = self.name, "flag pre-seeded from the environment");
                    self.value = Some(value);
                }
                Err(e) => warn!(flag = self.name, error = %e, "ignoring malformed environment value"),
            }
        }
        self
    }

    /// Flag name, without the leading dashes
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared type
    pub fn kind(&self) -> FlagKind {
        self.default.kind()
    }

    /// Default taken from the tree at registration
    pub fn default_value(&self) -> &FlagValue {
        &self.default
    }

    /// The explicitly set value, if any
    pub fn value(&self) -> Option<&FlagValue> {
        self.value.as_ref()
    }

    /// Application class
    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    /// Whether the flag was given on the command line or pre-seeded
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Parse `raw` according to the declared type and mark the flag set.
    pub fn set(&mut self, raw: &str) -> Result<()> {
        self.value = Some(self.parse(raw)?);
        Ok(())
    }

    /// Parse a raw command-line string into a typed value.
    ///
    /// An unsupported flag rejects every value with its fixed message.
    pub fn parse(&self, raw: &str) -> Result<FlagValue> {
        if let Apply::Unsupported(message) = self.apply {
            return Err(Error::input(message));
        }
        let invalid = |expected: &str| {
            Error::input(format!(
                "invalid argument \"{}\" for \"--{}\" flag: expected {}",
                raw, self.name, expected
            ))
        };
        let value = match self.kind() {
            FlagKind::Bool => match raw {
                "" | "true" | "TRUE" | "True" | "1" | "t" | "T" => FlagValue::Bool(true),
                "false" | "FALSE" | "False" | "0" | "f" | "F" => FlagValue::Bool(false),
                _ => return Err(invalid("a boolean")),
            },
            FlagKind::String => FlagValue::String(raw.to_string()),
            FlagKind::Int => FlagValue::Int(raw.trim().parse().map_err(|_| invalid("an integer"))?),
            FlagKind::Uint => FlagValue::Uint(
                raw.trim()
                    .parse()
                    .map_err(|_| invalid("a non-negative integer"))?,
            ),
            FlagKind::Duration => FlagValue::Duration(
                parse_duration(raw).map_err(|_| invalid("a duration such as 24h or 1m30s"))?,
            ),
            FlagKind::StringList => FlagValue::StringList(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            ),
        };
        Ok(value)
    }

    fn arg(&self) -> Arg {
        let default = self.default.to_string();
        let mut help = if default.is_empty() || matches!(self.apply, Apply::Unsupported(_)) {
            self.help.to_string()
        } else {
            format!("{} (default {})", self.help, default)
        };
        if let Some(var) = self.env {
            help.push_str(&format!(" [env: {}]", var));
        }

        let mut arg = Arg::new(self.name)
            .long(self.name)
            .help(help)
            .hide(self.hidden);
        if let Some(short) = self.short {
            arg = arg.short(short);
        }
        match self.kind() {
            FlagKind::Bool => arg
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true")
                .action(ArgAction::Set),
            FlagKind::StringList => arg.action(ArgAction::Append),
            _ => arg.action(ArgAction::Set),
        }
    }

    fn apply(&self, values: &mut Values) -> Result<()> {
        let Some(value) = self.value.clone() else {
            return Ok(());
        };
        if let Some(note) = self.deprecation {
            warn!(flag = self.name, "flag --{} has been deprecated, {}", self.name, note);
        }
        match (self.apply, value) {
            (Apply::Unsupported(message), _) => Err(Error::input(message)),
            (Apply::Bool(set), FlagValue::Bool(v)) => set(values, v),
            (Apply::String(set), FlagValue::String(v)) => set(values, v),
            (Apply::Int(set), FlagValue::Int(v)) => set(values, v),
            (Apply::Uint(set), FlagValue::Uint(v)) => set(values, v),
            (Apply::Duration(set), FlagValue::Duration(v)) => set(values, v),
            (Apply::StringList(set), FlagValue::StringList(v)) => set(values, v),
            (_, value) => Err(Error::input(format!(
                "flag --{} does not accept a {:?} value",
                self.name,
                value.kind()
            ))),
        }
    }
}

/// An ordered collection of flags
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    flags: Vec<Flag>,
}

impl FlagSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flag. Registration order is application order within a
    /// precedence class.
    pub fn register(&mut self, flag: Flag) -> &mut Self {
        debug_assert!(
            self.get(flag.name).is_none(),
            "flag --{} registered twice",
            flag.name
        );
        self.flags.push(flag);
        self
    }

    /// Register every flag of another set, after this set's flags
    pub fn extend(&mut self, other: FlagSet) -> &mut Self {
        for flag in other.flags {
            self.register(flag);
        }
        self
    }

    /// Look up a flag by name
    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.flags.iter().find(|f| f.name == name)
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter()
    }

    /// Set a flag by name from its raw text form
    pub fn set(&mut self, name: &str, raw: &str) -> Result<()> {
        let flag = self
            .flags
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::input(format!("unknown flag: --{}", name)))?;
        flag.set(raw)
    }

    /// Add every flag as an argument of `cmd`
    pub fn augment(&self, cmd: Command) -> Command {
        self.flags.iter().fold(cmd, |cmd, flag| cmd.arg(flag.arg()))
    }

    /// Record the values of flags given on the command line.
    ///
    /// Flags that were not given keep their pre-seeded value, if any.
    pub fn set_from_matches(&mut self, matches: &ArgMatches) -> Result<()> {
        for flag in &mut self.flags {
            if matches.value_source(flag.name) != Some(ValueSource::CommandLine) {
                continue;
            }
            let raw: Vec<&String> = matches
                .get_many::<String>(flag.name)
                .map(|vals| vals.collect())
                .unwrap_or_default();
            let joined = raw
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",");
            flag.set(&joined)?;
        }
        Ok(())
    }

    fn in_application_order(&self) -> impl Iterator<Item = &Flag> {
        let profiles = self
            .flags
            .iter()
            .filter(|f| f.precedence == Precedence::Profile);
        let settings = self
            .flags
            .iter()
            .filter(|f| f.precedence == Precedence::Setting);
        profiles.chain(settings)
    }
}

/// Run the setter of every set flag against `values`.
///
/// Profile flags apply first, then the rest in registration order. The first
/// setter error aborts and is returned unchanged; setters that already ran are
/// not rolled back, so the caller must discard `values` on error.
pub fn apply_all(values: &mut Values, flags: &FlagSet) -> Result<()> {
    for flag in flags.in_application_order().filter(|f| f.is_set()) {
        debug!(flag = flag.name, precedence = ?flag.precedence, "applying flag");
        flag.apply(values)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_domain(values: &mut Values, v: String) -> Result<()> {
        values.cluster_domain = v;
        Ok(())
    }

    fn set_replicas(values: &mut Values, v: u64) -> Result<()> {
        values.controller_replicas = v as u32;
        Ok(())
    }

    fn ha_profile(values: &mut Values, v: bool) -> Result<()> {
        values.high_availability = v;
        if v {
            values.controller_replicas = 3;
        }
        Ok(())
    }

    fn failing(_: &mut Values, _: String) -> Result<()> {
        Err(Error::input("setter failed"))
    }

    fn flags() -> FlagSet {
        let mut set = FlagSet::new();
        set.register(Flag::uint("controller-replicas", 1, "Replicas", set_replicas))
            .register(Flag::string("cluster-domain", "cluster.local", "Domain", set_domain))
            .register(Flag::bool("ha", false, "HA", ha_profile).profile());
        set
    }

    // =========================================================================
    // Story: Only flags the user gave are applied
    // =========================================================================

    #[test]
    fn unset_flags_leave_the_tree_alone() {
        let mut values = Values::new().unwrap();
        let before = values.clone();
        apply_all(&mut values, &flags()).unwrap();
        assert_eq!(values, before);
    }

    #[test]
    fn set_flags_write_through_their_setter() {
        let mut set = flags();
        set.set("cluster-domain", "foo.local").unwrap();

        let mut values = Values::new().unwrap();
        apply_all(&mut values, &set).unwrap();
        assert_eq!(values.cluster_domain, "foo.local");
        assert_eq!(values.controller_replicas, 1);
    }

    // =========================================================================
    // Story: The HA profile never overrides an explicit setting
    // =========================================================================

    #[test]
    fn profile_applies_before_specific_flags() {
        // controller-replicas is registered before ha, yet still wins
        let mut set = flags();
        set.set("controller-replicas", "5").unwrap();
        set.set("ha", "true").unwrap();

        let mut values = Values::new().unwrap();
        apply_all(&mut values, &set).unwrap();
        assert!(values.high_availability);
        assert_eq!(values.controller_replicas, 5);
    }

    #[test]
    fn first_setter_error_aborts() {
        let mut set = flags();
        set.register(Flag::string("broken", "", "Broken", failing));
        set.set("broken", "x").unwrap();
        set.set("cluster-domain", "foo.local").unwrap();

        let mut values = Values::new().unwrap();
        let err = apply_all(&mut values, &set).unwrap_err();
        assert_eq!(err.to_string(), "setter failed");
        // cluster-domain was registered first and already ran
        assert_eq!(values.cluster_domain, "foo.local");
    }

    // =========================================================================
    // Story: Legacy flags fail loudly
    // =========================================================================

    #[test]
    fn unsupported_flag_always_fails() {
        for raw in ["xyz", "false", "true", ""] {
            let mut set = FlagSet::new();
            set.register(Flag::unsupported("legacy", "Legacy", "--legacy is gone"));

            let err = set.set("legacy", raw).unwrap_err();
            assert!(matches!(err, Error::Input(_)));
            assert_eq!(err.to_string(), "--legacy is gone");
            assert!(!set.get("legacy").unwrap().is_set());
        }
    }

    #[test]
    fn unsupported_flag_from_command_line_fails_with_fixed_message() {
        let mut set = FlagSet::new();
        set.register(Flag::unsupported("legacy", "Legacy", "--legacy is gone"));
        let matches = set
            .augment(Command::new("install"))
            .try_get_matches_from(["install", "--legacy=xyz"])
            .unwrap();

        let err = set.set_from_matches(&matches).unwrap_err();
        assert_eq!(err.to_string(), "--legacy is gone");
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    #[test]
    fn malformed_values_are_input_errors() {
        let mut set = flags();
        let err = set.set("controller-replicas", "-1").unwrap_err();
        assert!(matches!(err, Error::Input(_)));
        assert!(err.to_string().contains("--controller-replicas"));

        assert!(set.set("ha", "maybe").is_err());
        assert!(set.set("nope", "1").is_err());
    }

    #[test]
    fn list_and_duration_parsing() {
        fn noop_list(_: &mut Values, _: Vec<String>) -> Result<()> {
            Ok(())
        }
        fn noop_duration(_: &mut Values, _: Duration) -> Result<()> {
            Ok(())
        }
        let list = Flag::string_list("ports", vec![], "Ports", noop_list);
        assert_eq!(
            list.parse("80, 443,,8080-8090").unwrap(),
            FlagValue::StringList(vec!["80".into(), "443".into(), "8080-8090".into()])
        );

        let lifetime = Flag::duration("lifetime", Duration::from_secs(1), "L", noop_duration);
        assert_eq!(
            lifetime.parse("1m30s").unwrap(),
            FlagValue::Duration(Duration::from_secs(90))
        );
        assert!(lifetime.parse("forever").is_err());
    }

    #[test]
    fn environment_preseeds_but_flag_overrides() {
        let flag = Flag::string("cluster-domain", "cluster.local", "Domain", set_domain)
            .preseed(Some("env.local".to_string()));
        assert_eq!(flag.value(), Some(&FlagValue::String("env.local".into())));

        let mut set = FlagSet::new();
        set.register(flag);
        let mut values = Values::new().unwrap();
        apply_all(&mut values, &set).unwrap();
        assert_eq!(values.cluster_domain, "env.local");

        set.set("cluster-domain", "cli.local").unwrap();
        apply_all(&mut values, &set).unwrap();
        assert_eq!(values.cluster_domain, "cli.local");
    }

    #[test]
    fn empty_environment_value_is_ignored() {
        let flag = Flag::string("cluster-domain", "cluster.local", "Domain", set_domain)
            .preseed(Some(String::new()));
        assert!(!flag.is_set());
    }

    // =========================================================================
    // Clap binding
    // =========================================================================

    #[test]
    fn matches_mark_only_given_flags() {
        let mut set = flags();
        let cmd = set.augment(Command::new("install"));
        let matches = cmd
            .try_get_matches_from(["install", "--ha", "--cluster-domain", "foo.local"])
            .unwrap();
        set.set_from_matches(&matches).unwrap();

        assert_eq!(set.get("ha").unwrap().value(), Some(&FlagValue::Bool(true)));
        assert_eq!(
            set.get("cluster-domain").unwrap().value(),
            Some(&FlagValue::String("foo.local".into()))
        );
        assert!(!set.get("controller-replicas").unwrap().is_set());
    }

    #[test]
    fn bool_flags_accept_explicit_false() {
        let mut set = flags();
        let matches = set
            .augment(Command::new("install"))
            .try_get_matches_from(["install", "--ha=false"])
            .unwrap();
        set.set_from_matches(&matches).unwrap();
        assert_eq!(set.get("ha").unwrap().value(), Some(&FlagValue::Bool(false)));
    }

    #[test]
    fn repeated_list_flags_accumulate() {
        fn noop_list(_: &mut Values, _: Vec<String>) -> Result<()> {
            Ok(())
        }
        let mut set = FlagSet::new();
        set.register(Flag::string_list("skip", vec![], "Skip", noop_list));
        let matches = set
            .augment(Command::new("install"))
            .try_get_matches_from(["install", "--skip", "80,443", "--skip", "9000"])
            .unwrap();
        set.set_from_matches(&matches).unwrap();
        assert_eq!(
            set.get("skip").unwrap().value(),
            Some(&FlagValue::StringList(vec!["80".into(), "443".into(), "9000".into()]))
        );
    }
}
