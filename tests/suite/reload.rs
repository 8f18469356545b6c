//! Silent reload and teardown

use std::sync::Arc;

use tether_extension::{Extension, Feature, PROJECT_LOADED_CONTEXT};
use tether_types::{ExtensionState, ServerProcessState};

use crate::common::{FakeLauncher, RecordingHost, ServerScript, settings_with_workspace};

fn extension(launcher: &FakeLauncher, host: &Arc<RecordingHost>) -> Extension<FakeLauncher, RecordingHost> {
    Extension::new(launcher.clone(), Arc::clone(host)).with_noisy_dirs(Vec::new())
}

#[tokio::test]
async fn repeated_reloads_leave_the_same_registration_set() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let registered = host.active();
    let mut previous = vec![ext.analyzer().unwrap().clone()];

    for _ in 0..3 {
        ext.reload().await.unwrap();
        assert_eq!(host.active(), registered);
        assert_eq!(ext.active_registrations(), registered);
        previous.push(ext.analyzer().unwrap().clone());
    }

    assert_eq!(ext.generation(), 4);
    assert_eq!(launcher.launches(), 4);

    let (current, stale) = previous.split_last().unwrap();
    assert_eq!(current.state(), ServerProcessState::Connected);
    for analyzer in stale {
        assert_eq!(analyzer.state(), ServerProcessState::Terminated);
        assert_eq!(analyzer.pending_requests(), 0);
    }
    for server in &launcher.servers()[..3] {
        assert_eq!(server.requests_for("server.shutdown").len(), 1);
    }
}

#[tokio::test]
async fn reload_picks_up_new_server_capabilities() {
    let launcher = FakeLauncher::new(ServerScript::version("1.18.0"));
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();
    assert!(!host.active().contains(&Feature::Folding));

    launcher.set_script(ServerScript::default());
    ext.reload().await.unwrap();

    assert_eq!(ext.current_capabilities().version(), "1.27.5");
    assert!(host.active().contains(&Feature::Folding));
}

#[tokio::test]
async fn deactivate_disposes_everything_and_stops_the_server() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();
    let analyzer = ext.analyzer().unwrap().clone();

    ext.deactivate(false).await;

    assert_eq!(ext.state(), ExtensionState::Inactive);
    assert!(host.active().is_empty());
    assert!(ext.active_registrations().is_empty());
    assert_eq!(host.context(PROJECT_LOADED_CONTEXT), Some(false));
    assert_eq!(analyzer.state(), ServerProcessState::Terminated);
    assert_eq!(
        launcher.latest().requests_for("server.shutdown").len(),
        1
    );
    // A clean stop is not an unexpected exit.
    assert!(host.errors().is_empty());
}

#[tokio::test]
async fn failing_and_panicking_disposers_do_not_stop_teardown() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    host.fail_disposal_of(Feature::Hover);
    host.panic_on_disposal_of(Feature::Completion);
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();
    let analyzer = ext.analyzer().unwrap().clone();

    ext.deactivate(false).await;

    assert_eq!(ext.state(), ExtensionState::Inactive);
    assert_eq!(host.active(), [Feature::Hover]);
    assert_eq!(analyzer.state(), ServerProcessState::Terminated);
}

#[tokio::test]
async fn reload_after_failed_activation_starts_fresh() {
    let launcher = FakeLauncher::new(ServerScript {
        exit_immediately: true,
        ..ServerScript::default()
    });
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    assert!(ext.activate(settings_with_workspace("/ws/app")).await.is_err());

    launcher.set_script(ServerScript::default());
    ext.reload().await.unwrap();

    assert_eq!(ext.state(), ExtensionState::Active);
    assert_eq!(ext.generation(), 2);
    assert_eq!(host.active().len(), 15);
}

#[tokio::test]
async fn deactivate_when_inactive_is_harmless() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    ext.deactivate(false).await;

    assert_eq!(ext.state(), ExtensionState::Inactive);
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn cancel_all_fails_in_flight_requests() {
    let launcher = FakeLauncher::new(ServerScript {
        silent_methods: vec!["edit.format".to_string()],
        ..ServerScript::default()
    });
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let analyzer = ext.analyzer().unwrap().clone();
    let request = tokio::spawn(async move { analyzer.request("edit.format", None).await });

    let server = launcher.latest();
    crate::common::eventually("format request to reach the server", || {
        !server.requests_for("edit.format").is_empty()
    })
    .await;

    assert_eq!(ext.cancel_all_requests().await, 1);
    let err = request.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("cancelled by client"));
    assert_eq!(ext.analyzer().unwrap().state(), ServerProcessState::Connected);
}
