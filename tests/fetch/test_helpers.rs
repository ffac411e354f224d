//! Shared fixtures for fetch BDD scenarios.

use std::cell::RefCell;
use std::time::Duration;

use camino::Utf8PathBuf;
use reality_proxy::fetch::{ConfigFetcher, FetchRequest};
use reality_proxy::outputs::OutputsStore;
use reality_proxy::remote::PollPolicy;
use reality_proxy::test_support::ScriptedConnector;
use rstest::fixture;
use tempfile::TempDir;

#[derive(Debug)]
pub struct FetchContext {
    _tmp: TempDir,
    pub root: Utf8PathBuf,
    pub connector: ScriptedConnector,
    pub outcome: RefCell<Option<Result<Utf8PathBuf, String>>>,
}

impl FetchContext {
    pub fn outputs_path(&self) -> Utf8PathBuf {
        self.root.join("outputs.json")
    }

    pub fn output_path(&self) -> Utf8PathBuf {
        self.root.join("reality-config.txt")
    }

    pub fn fetcher(&self) -> ConfigFetcher {
        ConfigFetcher::new(OutputsStore::new(self.outputs_path())).with_policy(PollPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            timeout: Duration::from_secs(5),
        })
    }

    pub fn request(&self) -> FetchRequest {
        FetchRequest {
            stack_name: String::from("VlessProxyStack"),
            output_path: self.output_path(),
            wait_for_setup: false,
        }
    }
}

#[fixture]
pub fn fetch_context() -> FetchContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create fetch temp directory: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    FetchContext {
        _tmp: tmp,
        root,
        connector: ScriptedConnector::default(),
        outcome: RefCell::new(None),
    }
}
