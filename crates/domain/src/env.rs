//! Generic environment population.
//!
//! A configuration type declares a table of [`EnvBinding`]s, each naming the
//! variable that feeds one field, the [`EnvKind`] used to coerce the raw text,
//! and a setter. [`populate`] walks the table in order and stops at the first
//! missing variable, parse failure or type mismatch.

use std::{
    borrow::Borrow,
    collections::HashMap,
    env::{self, VarError},
    fmt,
    hash::Hash,
    num::ParseIntError,
    str::FromStr,
};

use crate::config::ConfigError;

/// Supplies raw variable values to [`populate`].
pub trait EnvSource {
    /// `Ok(None)` means the variable is unset.
    fn lookup(&self, key: &'static str) -> Result<Option<String>, ConfigError>;
}

/// The live process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn lookup(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(err @ VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
                key,
                reason: err.to_string(),
            }),
        }
    }
}

impl<K, V> EnvSource for HashMap<K, V>
where
    K: Borrow<str> + Eq + Hash,
    V: AsRef<str>,
{
    fn lookup(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        Ok(self.get(key).map(|value| value.as_ref().to_owned()))
    }
}

/// Coercion rules understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    U8,
    U16,
    U32,
    /// Signed, base-10.
    Int,
    /// Raw text, passed through untouched.
    Text,
    /// Space-delimited list, see [`split_space_list`].
    TextList,
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::Int => "int",
            Self::Text => "text",
            Self::TextList => "text list",
        };
        f.write_str(name)
    }
}

/// A coerced value, tagged with the kind that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    U8(u8),
    U16(u16),
    U32(u32),
    Int(i64),
    Text(String),
    TextList(Vec<String>),
}

impl EnvValue {
    pub fn kind(&self) -> EnvKind {
        match self {
            Self::U8(_) => EnvKind::U8,
            Self::U16(_) => EnvKind::U16,
            Self::U32(_) => EnvKind::U32,
            Self::Int(_) => EnvKind::Int,
            Self::Text(_) => EnvKind::Text,
            Self::TextList(_) => EnvKind::TextList,
        }
    }
}

/// Coerces `raw` according to `kind`. Integers are parsed in base 10 and
/// range-checked against the target width.
pub fn coerce(key: &'static str, raw: &str, kind: EnvKind) -> Result<EnvValue, ConfigError> {
    let value = match kind {
        EnvKind::U8 => EnvValue::U8(parse_unsigned(key, raw)?),
        EnvKind::U16 => EnvValue::U16(parse_unsigned(key, raw)?),
        EnvKind::U32 => EnvValue::U32(parse_unsigned(key, raw)?),
        EnvKind::Int => EnvValue::Int(parse_integer(key, raw)?),
        EnvKind::Text => EnvValue::Text(raw.to_owned()),
        EnvKind::TextList => EnvValue::TextList(split_space_list(raw)),
    };
    Ok(value)
}

/// Unsigned values take bare digits only; `str::parse` would also accept a
/// leading `+`.
fn parse_unsigned<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = ParseIntError>,
{
    if raw.starts_with('+') {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "sign not allowed for unsigned integer".to_string(),
        });
    }
    parse_integer(key, raw)
}

fn parse_integer<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = ParseIntError>,
{
    raw.parse().map_err(|err: ParseIntError| ConfigError::InvalidValue {
        key,
        reason: err.to_string(),
    })
}

/// Splits on every single space. Consecutive spaces yield empty entries.
pub fn split_space_list(raw: &str) -> Vec<String> {
    raw.split(' ').map(str::to_owned).collect()
}

/// Converts a coerced value into a concrete field type. A value of the wrong
/// kind is an [`ConfigError::UnsupportedType`].
pub trait FromEnvValue: Sized {
    fn from_env_value(key: &'static str, value: EnvValue) -> Result<Self, ConfigError>;
}

macro_rules! impl_from_env_value {
    ($($target:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromEnvValue for $target {
                fn from_env_value(key: &'static str, value: EnvValue) -> Result<Self, ConfigError> {
                    match value {
                        EnvValue::$variant(inner) => Ok(inner),
                        other => Err(ConfigError::UnsupportedType {
                            key,
                            kind: other.kind(),
                            target: std::any::type_name::<$target>(),
                        }),
                    }
                }
            }
        )*
    };
}

impl_from_env_value!(
    u8 => U8,
    u16 => U16,
    u32 => U32,
    i64 => Int,
    String => Text,
    Vec<String> => TextList,
);

type Assign<C> = Box<dyn Fn(&mut C, EnvValue) -> Result<(), ConfigError> + Send + Sync>;

/// One row of a configuration table: variable name, coercion and setter.
pub struct EnvBinding<C> {
    key: &'static str,
    kind: EnvKind,
    assign: Assign<C>,
}

impl<C> EnvBinding<C> {
    pub fn new<T, F>(key: &'static str, kind: EnvKind, set: F) -> Self
    where
        T: FromEnvValue,
        F: Fn(&mut C, T) + Send + Sync + 'static,
    {
        Self {
            key,
            kind,
            assign: Box::new(move |target, value| {
                set(target, T::from_env_value(key, value)?);
                Ok(())
            }),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }
}

impl<C> fmt::Debug for EnvBinding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvBinding")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Builds a `C` by applying every binding in order.
pub fn populate<C, S>(source: &S, bindings: &[EnvBinding<C>]) -> Result<C, ConfigError>
where
    C: Default,
    S: EnvSource + ?Sized,
{
    let mut target = C::default();
    for binding in bindings {
        let raw = source
            .lookup(binding.key)?
            .ok_or(ConfigError::MissingVar { key: binding.key })?;
        let value = coerce(binding.key, &raw, binding.kind)?;
        (binding.assign)(&mut target, value)?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct TestConfig {
        app_name: String,
        timeout_seconds: u8,
    }

    fn test_bindings() -> Vec<EnvBinding<TestConfig>> {
        vec![
            EnvBinding::new("APP_NAME", EnvKind::Text, |c: &mut TestConfig, v: String| {
                c.app_name = v
            }),
            EnvBinding::new(
                "TIMEOUT_SECONDS",
                EnvKind::U8,
                |c: &mut TestConfig, v: u8| c.timeout_seconds = v,
            ),
        ]
    }

    #[test]
    fn populates_every_binding() {
        let source = HashMap::from([("APP_NAME", "env-test"), ("TIMEOUT_SECONDS", "10")]);

        let config = populate(&source, &test_bindings()).expect("config populates");
        assert_eq!(config.app_name, "env-test");
        assert_eq!(config.timeout_seconds, 10);
    }

    #[test]
    fn out_of_range_integer_is_rejected() {
        let source = HashMap::from([("APP_NAME", "env-test"), ("TIMEOUT_SECONDS", "300")]);

        let err = populate(&source, &test_bindings()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, reason } => {
                assert_eq!(key, "TIMEOUT_SECONDS");
                assert!(reason.contains("too large"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_numeric_integer_is_rejected() {
        let err = coerce("TIMEOUT_SECONDS", "ten", EnvKind::U16).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "TIMEOUT_SECONDS",
                ..
            }
        ));
    }

    #[test]
    fn missing_variable_is_named_and_aborts() {
        let source = HashMap::from([("TIMEOUT_SECONDS", "not-even-read")]);

        let err = populate(&source, &test_bindings()).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar { key: "APP_NAME" });
        assert!(err.to_string().contains("APP_NAME"));
    }

    #[test]
    fn mismatched_binding_is_unsupported() {
        let bindings = vec![EnvBinding::new(
            "TIMEOUT_SECONDS",
            EnvKind::Text,
            |c: &mut TestConfig, v: u8| c.timeout_seconds = v,
        )];
        let source = HashMap::from([("TIMEOUT_SECONDS", "10")]);

        let err = populate(&source, &bindings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedType {
                key: "TIMEOUT_SECONDS",
                kind: EnvKind::Text,
                target: "u8",
            }
        ));
    }

    #[test]
    fn coerces_every_kind() {
        assert_eq!(coerce("K", "255", EnvKind::U8).unwrap(), EnvValue::U8(255));
        assert_eq!(
            coerce("K", "65535", EnvKind::U16).unwrap(),
            EnvValue::U16(65535)
        );
        assert_eq!(
            coerce("K", "4294967295", EnvKind::U32).unwrap(),
            EnvValue::U32(u32::MAX)
        );
        assert_eq!(coerce("K", "-42", EnvKind::Int).unwrap(), EnvValue::Int(-42));
        assert_eq!(
            coerce("K", " padded ", EnvKind::Text).unwrap(),
            EnvValue::Text(" padded ".to_string())
        );
        assert_eq!(
            coerce("K", "a b,c", EnvKind::TextList).unwrap(),
            EnvValue::TextList(vec!["a".to_string(), "b,c".to_string()])
        );
        assert!(coerce("K", "-1", EnvKind::U32).is_err());
    }

    #[test]
    fn unsigned_kinds_reject_a_plus_sign() {
        for kind in [EnvKind::U8, EnvKind::U16, EnvKind::U32] {
            let err = coerce("TIMEOUT_SECONDS", "+10", kind).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    key: "TIMEOUT_SECONDS",
                    ..
                }
            ));
        }
        assert_eq!(coerce("K", "+10", EnvKind::Int).unwrap(), EnvValue::Int(10));
    }

    #[cfg(unix)]
    #[test]
    fn non_unicode_process_value_is_rejected() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        const KEY: &str = "COURIER_ENV_TEST_NON_UNICODE";
        env::set_var(KEY, OsStr::from_bytes(&[b'o', b'k', 0x80]));
        let looked_up = ProcessEnv.lookup(KEY);
        env::remove_var(KEY);

        assert!(matches!(
            looked_up,
            Err(ConfigError::InvalidValue { key: KEY, .. })
        ));
        assert_eq!(ProcessEnv.lookup(KEY), Ok(None));
    }

    #[test]
    fn space_list_splits_on_single_spaces() {
        assert_eq!(split_space_list("one two"), vec!["one", "two"]);
        assert_eq!(split_space_list("one  two"), vec!["one", "", "two"]);
        assert_eq!(split_space_list(""), vec![""]);
    }
}
