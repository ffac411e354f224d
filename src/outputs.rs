//! Persisted deployment facts.
//!
//! The outputs file is a JSON object keyed by stack name, each entry a flat
//! map of fact name to value. Downstream tooling depends on the exact key
//! names, so they are exported as constants.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outputs file used when nothing else is configured.
pub const DEFAULT_OUTPUTS_FILE: &str = "outputs.json";

/// Static address of the proxy.
pub const PROXY_IP_KEY: &str = "ProxyIP";
/// Provider id of the proxy instance.
pub const INSTANCE_ID_KEY: &str = "InstanceId";
/// Region hosting the stack.
pub const REGION_KEY: &str = "Region";
/// Ready-to-run session manager command.
pub const SESSION_MANAGER_ACCESS_KEY: &str = "SessionManagerAccess";
/// Hint for fetching the client configuration.
pub const CONFIG_INSTRUCTIONS_KEY: &str = "ConfigInstructions";

/// Flat mapping from fact name to value for one stack.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutputFacts(BTreeMap<String, String>);

impl OutputFacts {
    /// Creates an empty set of facts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fact, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks up a fact.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of recorded facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no fact is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates facts in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl FromIterator<(String, String)> for OutputFacts {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Facts the configuration fetch needs to reach the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyTarget {
    /// Region hosting the instance.
    pub region: String,
    /// Provider id of the instance.
    pub instance_id: String,
}

/// Errors raised while reading or writing the outputs file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum OutputsError {
    /// The file is absent, unreadable, or lacks an expected fact.
    #[error("missing output facts in {path}: {reason}")]
    MissingFacts {
        /// Outputs file consulted.
        path: Utf8PathBuf,
        /// What was missing or unreadable.
        reason: String,
    },
    /// Writing the file failed.
    #[error("failed to write {path}: {message}")]
    Write {
        /// Outputs file being written.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Reads and writes the outputs file at a fixed path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputsStore {
    path: Utf8PathBuf,
}

impl OutputsStore {
    /// Builds a store over `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the outputs file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Loads the facts recorded for `stack_name`.
    ///
    /// # Errors
    ///
    /// Returns [`OutputsError::MissingFacts`] when the file cannot be read or
    /// parsed, or when it has no entry for the stack.
    pub fn load(&self, stack_name: &str) -> Result<OutputFacts, OutputsError> {
        let contents = read_file(&self.path).map_err(|err| self.missing(err.to_string()))?;
        let mut stacks = parse(&contents).map_err(|message| self.missing(message))?;
        stacks
            .remove(stack_name)
            .ok_or_else(|| self.missing(format!("no entry for stack {stack_name}")))
    }

    /// Loads the region and instance id recorded for `stack_name`.
    ///
    /// # Errors
    ///
    /// Returns [`OutputsError::MissingFacts`] when the facts cannot be loaded
    /// or either key is absent or blank.
    pub fn load_target(&self, stack_name: &str) -> Result<ProxyTarget, OutputsError> {
        let facts = self.load(stack_name)?;
        Ok(ProxyTarget {
            region: self.require(&facts, stack_name, REGION_KEY)?,
            instance_id: self.require(&facts, stack_name, INSTANCE_ID_KEY)?,
        })
    }

    /// Records `facts` under `stack_name`, keeping entries for other stacks.
    ///
    /// # Errors
    ///
    /// Returns [`OutputsError::Write`] when the existing file cannot be parsed
    /// or the new contents cannot be written.
    pub fn write(&self, stack_name: &str, facts: &OutputFacts) -> Result<(), OutputsError> {
        let mut stacks = match read_file(&self.path) {
            Ok(contents) => parse(&contents).map_err(|message| self.write_error(message))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(self.write_error(err.to_string())),
        };
        stacks.insert(stack_name.to_owned(), facts.clone());

        let rendered = serde_json::to_string_pretty(&stacks)
            .map_err(|err| self.write_error(err.to_string()))?;
        write_file(&self.path, &rendered).map_err(|err| self.write_error(err.to_string()))
    }

    fn require(
        &self,
        facts: &OutputFacts,
        stack_name: &str,
        key: &str,
    ) -> Result<String, OutputsError> {
        match facts.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
            _ => Err(self.missing(format!("stack {stack_name} has no {key}"))),
        }
    }

    fn missing(&self, reason: String) -> OutputsError {
        OutputsError::MissingFacts {
            path: self.path.clone(),
            reason,
        }
    }

    fn write_error(&self, message: String) -> OutputsError {
        OutputsError::Write {
            path: self.path.clone(),
            message,
        }
    }
}

fn parse(contents: &str) -> Result<BTreeMap<String, OutputFacts>, String> {
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(contents).map_err(|err| err.to_string())
}

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {path}"),
        )
    })?;
    Ok((parent, file_name))
}

/// Reads a UTF-8 file through an ambient directory handle.
pub(crate) fn read_file(path: &Utf8Path) -> io::Result<String> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(file_name)
}

/// Writes a file through an ambient directory handle, creating parents.
pub(crate) fn write_file(path: &Utf8Path, contents: &str) -> io::Result<()> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.write(file_name, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct StoreFixture {
        _tmp: TempDir,
        path: Utf8PathBuf,
        store: OutputsStore,
    }

    #[fixture]
    fn store_fixture() -> StoreFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("outputs.json"))
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
        let store = OutputsStore::new(path.clone());
        StoreFixture {
            _tmp: tmp,
            path,
            store,
        }
    }

    fn facts(pairs: &[(&str, &str)]) -> OutputFacts {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[rstest]
    fn load_target_reads_region_and_instance(store_fixture: StoreFixture) {
        write_file(
            &store_fixture.path,
            r#"{"VlessProxyStack": {"Region": "us-east-1", "InstanceId": "i-0123"}}"#,
        )
        .unwrap_or_else(|err| panic!("seed outputs: {err}"));

        let target = store_fixture
            .store
            .load_target("VlessProxyStack")
            .unwrap_or_else(|err| panic!("load target: {err}"));

        assert_eq!(
            target,
            ProxyTarget {
                region: String::from("us-east-1"),
                instance_id: String::from("i-0123"),
            }
        );
    }

    #[rstest]
    fn load_target_rejects_missing_instance_id(store_fixture: StoreFixture) {
        write_file(
            &store_fixture.path,
            r#"{"VlessProxyStack": {"Region": "us-east-1"}}"#,
        )
        .unwrap_or_else(|err| panic!("seed outputs: {err}"));

        let err = store_fixture
            .store
            .load_target("VlessProxyStack")
            .expect_err("missing InstanceId should fail");

        assert!(
            matches!(
                err,
                OutputsError::MissingFacts { ref reason, .. } if reason.contains("InstanceId")
            ),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn load_reports_absent_file(store_fixture: StoreFixture) {
        let err = store_fixture
            .store
            .load("VlessProxyStack")
            .expect_err("absent file should fail");

        assert!(matches!(err, OutputsError::MissingFacts { .. }));
    }

    #[rstest]
    fn load_reports_unknown_stack(store_fixture: StoreFixture) {
        write_file(&store_fixture.path, r#"{"OtherStack": {}}"#)
            .unwrap_or_else(|err| panic!("seed outputs: {err}"));

        let err = store_fixture
            .store
            .load("VlessProxyStack")
            .expect_err("unknown stack should fail");

        assert!(err.to_string().contains("no entry for stack VlessProxyStack"));
    }

    #[rstest]
    fn load_reports_malformed_json(store_fixture: StoreFixture) {
        write_file(&store_fixture.path, "{not json")
            .unwrap_or_else(|err| panic!("seed outputs: {err}"));

        let err = store_fixture
            .store
            .load("VlessProxyStack")
            .expect_err("malformed file should fail");

        assert!(matches!(err, OutputsError::MissingFacts { .. }));
    }

    #[rstest]
    fn write_keeps_other_stacks(store_fixture: StoreFixture) {
        let StoreFixture { store, .. } = store_fixture;
        store
            .write("OtherStack", &facts(&[("Region", "eu-west-1")]))
            .unwrap_or_else(|err| panic!("seed other stack: {err}"));

        let written = facts(&[
            ("Region", "us-east-1"),
            ("InstanceId", "i-0123"),
            ("ProxyIP", "203.0.113.10"),
        ]);
        store
            .write("VlessProxyStack", &written)
            .unwrap_or_else(|err| panic!("write outputs: {err}"));

        assert_eq!(
            store
                .load("VlessProxyStack")
                .unwrap_or_else(|err| panic!("reload: {err}")),
            written
        );
        assert_eq!(
            store
                .load("OtherStack")
                .unwrap_or_else(|err| panic!("reload other: {err}"))
                .get("Region"),
            Some("eu-west-1")
        );
    }
}
