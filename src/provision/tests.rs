//! Tests for the stack provisioner.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::stack::DEFAULT_STACK_NAME;
use crate::test_support::{
    EngineCall, ScriptedEngine, ScriptedError, ScriptedImageResolver, TEST_ACCOUNT,
    complete_outputs, stack_snapshot,
};

const IMAGE: &str = "ami-0abc1234def567890";

struct Workspace {
    _tmp: TempDir,
    store: OutputsStore,
    engine: ScriptedEngine,
}

impl Workspace {
    fn provisioner(
        &self,
        resolver: ScriptedImageResolver,
    ) -> Provisioner<ScriptedEngine, ScriptedImageResolver> {
        Provisioner::new(self.engine.clone(), resolver, self.store.clone())
            .with_poll_interval(Duration::from_millis(1))
            .with_wait_timeout(Duration::from_secs(5))
    }

    fn lifecycle(&self) -> StackLifecycle<ScriptedEngine> {
        StackLifecycle::new(self.engine.clone())
            .with_poll_interval(Duration::from_millis(1))
            .with_wait_timeout(Duration::from_secs(5))
    }
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("outputs.json"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    Workspace {
        _tmp: tmp,
        store: OutputsStore::new(path),
        engine: ScriptedEngine::new(),
    }
}

fn request() -> DeployRequest {
    DeployRequest {
        stack_name: String::from(DEFAULT_STACK_NAME),
        account: Some(String::from(TEST_ACCOUNT)),
        region: String::from("us-east-1"),
        instance_type: String::from("t2.micro"),
    }
}

fn resolver() -> ScriptedImageResolver {
    ScriptedImageResolver::resolving(IMAGE)
}

fn failed_snapshot(status: &str, reason: &str) -> Option<StackSnapshot> {
    let mut snapshot = stack_snapshot(status, &[]);
    snapshot.status_reason = Some(reason.to_owned());
    Some(snapshot)
}

#[rstest]
#[tokio::test]
async fn creates_missing_stack_and_persists_facts(workspace: Workspace) {
    workspace.engine.push_describe(None);
    workspace.engine.push_status("CREATE_IN_PROGRESS", &[]);
    workspace
        .engine
        .push_status("CREATE_COMPLETE", &complete_outputs());

    let facts = workspace
        .provisioner(resolver())
        .provision(&request())
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    assert_eq!(facts.len(), REQUIRED_OUTPUTS.len());
    assert_eq!(facts.get(INSTANCE_ID_KEY), Some("i-0123456789abcdef0"));
    let persisted = workspace
        .store
        .load(DEFAULT_STACK_NAME)
        .unwrap_or_else(|err| panic!("load persisted facts: {err}"));
    assert_eq!(persisted, facts);

    let calls = workspace.engine.calls();
    assert_eq!(calls.len(), 4, "calls: {calls:?}");
    assert!(
        matches!(calls.get(1), Some(EngineCall::Create(body)) if body.contains(IMAGE)),
        "calls: {calls:?}"
    );
}

#[rstest]
#[tokio::test]
async fn unchanged_stack_reuses_existing_outputs(workspace: Workspace) {
    workspace
        .engine
        .push_status("UPDATE_COMPLETE", &complete_outputs());
    workspace.engine.set_update_outcome(UpdateOutcome::NoChanges);

    let facts = workspace
        .provisioner(resolver())
        .provision(&request())
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    assert_eq!(facts.get(REGION_KEY), Some("us-east-1"));
    let calls = workspace.engine.calls();
    assert_eq!(calls.len(), 2, "calls: {calls:?}");
    assert!(matches!(calls.get(1), Some(EngineCall::Update(_))), "calls: {calls:?}");
}

#[rstest]
#[tokio::test]
async fn rolled_back_update_reports_the_reason(workspace: Workspace) {
    workspace
        .engine
        .push_status("CREATE_COMPLETE", &complete_outputs());
    workspace.engine.push_status("UPDATE_IN_PROGRESS", &[]);
    workspace.engine.push_describe(failed_snapshot(
        "UPDATE_ROLLBACK_COMPLETE",
        "Resource handler returned message: instance type not supported",
    ));

    let err = workspace
        .provisioner(resolver())
        .provision(&request())
        .await
        .expect_err("rolled back update should fail");

    match err {
        ProvisionError::StackFailed { status, reason, .. } => {
            assert_eq!(status, "UPDATE_ROLLBACK_COMPLETE");
            assert!(reason.contains("instance type not supported"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(workspace.store.load(DEFAULT_STACK_NAME).is_err());
}

#[rstest]
#[case("ROLLBACK_COMPLETE")]
#[case("ROLLBACK_FAILED")]
#[tokio::test]
async fn rolled_back_creation_requires_destroy(workspace: Workspace, #[case] status: &str) {
    workspace.engine.push_status(status, &[]);

    let err = workspace
        .provisioner(resolver())
        .provision(&request())
        .await
        .expect_err("rolled back stack cannot be updated");

    assert!(
        matches!(err, ProvisionError::RequiresTeardown { .. }),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains("reality-proxy destroy"));
    assert_eq!(workspace.engine.calls(), vec![EngineCall::Describe]);
}

#[rstest]
#[tokio::test]
async fn stack_in_another_account_is_rejected(workspace: Workspace) {
    workspace
        .engine
        .push_status("CREATE_COMPLETE", &complete_outputs());
    let request = DeployRequest {
        account: Some(String::from("999999999999")),
        ..request()
    };

    let err = workspace
        .provisioner(resolver())
        .provision(&request)
        .await
        .expect_err("account mismatch should fail");

    match err {
        ProvisionError::AccountMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, "999999999999");
            assert_eq!(actual, TEST_ACCOUNT);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(workspace.engine.calls(), vec![EngineCall::Describe]);
}

#[rstest]
#[tokio::test]
async fn stack_that_never_settles_times_out(workspace: Workspace) {
    workspace.engine.push_describe(None);
    workspace.engine.push_status("CREATE_IN_PROGRESS", &[]);
    let provisioner = workspace
        .provisioner(resolver())
        .with_wait_timeout(Duration::from_millis(20));

    let err = provisioner
        .provision(&request())
        .await
        .expect_err("stack never settles");

    match err {
        ProvisionError::Timeout { status, .. } => assert_eq!(status, "CREATE_IN_PROGRESS"),
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
#[tokio::test]
async fn missing_output_is_reported_and_nothing_persisted(workspace: Workspace) {
    let partial: Vec<_> = complete_outputs()
        .into_iter()
        .filter(|(key, _)| *key != CONFIG_INSTRUCTIONS_KEY)
        .collect();
    workspace.engine.push_describe(None);
    workspace.engine.push_status("CREATE_COMPLETE", &partial);

    let err = workspace
        .provisioner(resolver())
        .provision(&request())
        .await
        .expect_err("missing output should fail");

    assert!(
        matches!(err, ProvisionError::MissingOutput { key, .. } if key == CONFIG_INSTRUCTIONS_KEY),
        "unexpected error: {err}"
    );
    assert!(workspace.store.load(DEFAULT_STACK_NAME).is_err());
}

#[rstest]
#[tokio::test]
async fn image_failure_skips_the_engine(workspace: Workspace) {
    let resolver = ScriptedImageResolver::failing(ImageLookupError::Missing {
        parameter: String::from("/aws/service/example"),
    });

    let err = workspace
        .provisioner(resolver.clone())
        .provision(&request())
        .await
        .expect_err("image failure should abort");

    assert!(matches!(err, ProvisionError::Image(_)), "unexpected error: {err}");
    assert!(workspace.engine.calls().is_empty());
    assert_eq!(resolver.lookups(), 1);
}

#[rstest]
#[tokio::test]
async fn create_rejection_surfaces_engine_error(workspace: Workspace) {
    workspace.engine.fail_create("InsufficientCapabilities");

    let err = workspace
        .provisioner(resolver())
        .provision(&request())
        .await
        .expect_err("create failure should abort");

    assert!(
        matches!(
            err,
            ProvisionError::Engine(ScriptedError(ref message))
                if message == "InsufficientCapabilities"
        ),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn synth_embeds_the_resolved_image(workspace: Workspace) {
    let template = workspace
        .provisioner(resolver())
        .synth(&request())
        .await
        .unwrap_or_else(|err| panic!("synth: {err}"));

    let body = template
        .render()
        .unwrap_or_else(|err| panic!("render: {err}"));
    assert!(body.contains(IMAGE));
    assert!(workspace.engine.calls().is_empty());
}

#[rstest]
#[case(None)]
#[case(Some(stack_snapshot("DELETE_COMPLETE", &[])))]
#[tokio::test]
async fn destroying_an_absent_stack_is_a_no_op(
    workspace: Workspace,
    #[case] described: Option<StackSnapshot>,
) {
    workspace.engine.push_describe(described);

    let outcome = workspace
        .lifecycle()
        .destroy(DEFAULT_STACK_NAME)
        .await
        .unwrap_or_else(|err| panic!("destroy: {err}"));

    assert_eq!(outcome, DestroyOutcome::Absent);
    assert_eq!(workspace.engine.calls(), vec![EngineCall::Describe]);
}

#[rstest]
#[tokio::test]
async fn destroy_waits_until_the_stack_is_gone(workspace: Workspace) {
    workspace
        .engine
        .push_status("CREATE_COMPLETE", &complete_outputs());
    workspace.engine.push_status("DELETE_IN_PROGRESS", &[]);
    workspace.engine.push_describe(None);

    let outcome = workspace
        .lifecycle()
        .destroy(DEFAULT_STACK_NAME)
        .await
        .unwrap_or_else(|err| panic!("destroy: {err}"));

    assert_eq!(outcome, DestroyOutcome::Deleted);
    assert_eq!(
        workspace.engine.calls(),
        vec![
            EngineCall::Describe,
            EngineCall::Delete,
            EngineCall::Describe,
            EngineCall::Describe,
        ]
    );
}

#[rstest]
#[tokio::test]
async fn failed_deletion_is_reported(workspace: Workspace) {
    workspace
        .engine
        .push_status("CREATE_COMPLETE", &complete_outputs());
    workspace
        .engine
        .push_describe(failed_snapshot("DELETE_FAILED", "bucket not empty"));

    let err = workspace
        .lifecycle()
        .destroy(DEFAULT_STACK_NAME)
        .await
        .expect_err("failed deletion should error");

    assert!(err.to_string().contains("bucket not empty"), "error: {err}");
}

#[rstest]
#[tokio::test]
async fn unbounded_wait_timeout_still_settles(workspace: Workspace) {
    workspace.engine.push_describe(None);
    workspace.engine.push_status("CREATE_IN_PROGRESS", &[]);
    workspace
        .engine
        .push_status("CREATE_COMPLETE", &complete_outputs());

    let facts = workspace
        .provisioner(resolver())
        .with_wait_timeout(Duration::from_secs(u64::MAX))
        .provision(&request())
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    assert_eq!(facts.get(INSTANCE_ID_KEY), Some("i-0123456789abcdef0"));
}
