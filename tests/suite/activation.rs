//! Activation, capability gating and failure reporting

use std::sync::Arc;

use serde_json::json;
use tether_analyzer::{AnalyzerError, EventKind};
use tether_extension::{
    DocumentSelector, ExtensionError, Extension, Feature, PROJECT_LOADED_CONTEXT,
};
use tether_types::{ExtensionState, ServerProcessState, Settings};

use crate::common::{FakeLauncher, RecordingHost, ServerScript, settings_with_workspace};

fn extension(launcher: &FakeLauncher, host: &Arc<RecordingHost>) -> Extension<FakeLauncher, RecordingHost> {
    Extension::new(launcher.clone(), Arc::clone(host)).with_noisy_dirs(Vec::new())
}

#[tokio::test]
async fn activation_wires_every_feature_for_a_current_server() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    assert_eq!(ext.state(), ExtensionState::Active);
    assert_eq!(ext.generation(), 1);
    assert_eq!(ext.current_capabilities().version(), "1.27.5");
    assert_eq!(host.active().len(), 15);
    assert_eq!(host.active(), ext.active_registrations());
    assert_eq!(host.context(PROJECT_LOADED_CONTEXT), Some(true));

    let server = launcher.latest();
    let roots = server.requests_for("analysis.setAnalysisRoots");
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["params"]["included"], json!(["/ws/app"]));
    assert_eq!(roots[0]["params"]["excluded"], json!([]));

    let subscriptions = server.requests_for("completion.setSubscriptions");
    assert_eq!(
        subscriptions[0]["params"]["subscriptions"],
        json!(["AVAILABLE_SUGGESTION_SETS"])
    );
}

#[tokio::test]
async fn old_server_gets_only_ungated_features() {
    let launcher = FakeLauncher::new(ServerScript::version("1.18.0"));
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let active = host.active();
    assert_eq!(active.len(), 11);
    for gated in [
        Feature::ClosingLabels,
        Feature::Folding,
        Feature::SignatureHelp,
        Feature::AvailableSuggestions,
    ] {
        assert!(!active.contains(&gated), "{gated} should not be registered");
    }
    assert!(
        launcher
            .latest()
            .requests_for("completion.setSubscriptions")
            .is_empty()
    );
}

#[tokio::test]
async fn explicit_false_capability_overrides_version() {
    let launcher = FakeLauncher::new(ServerScript {
        capabilities: Some(json!({"supportsCustomFolding": false})),
        ..ServerScript::default()
    });
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    let settings = Settings {
        analysis_server_folding: true,
        ..settings_with_workspace("/ws/app")
    };
    ext.activate(settings).await.unwrap();

    assert!(!host.active().contains(&Feature::Folding));
    assert!(host.active().contains(&Feature::ClosingLabels));
}

#[tokio::test]
async fn disabled_setting_skips_supported_feature() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    let settings = Settings {
        closing_labels: false,
        ..settings_with_workspace("/ws/app")
    };
    ext.activate(settings).await.unwrap();

    assert!(!host.active().contains(&Feature::ClosingLabels));
    assert!(host.active().contains(&Feature::Folding));
}

#[tokio::test]
async fn template_analysis_widens_selectors_except_primary_only_features() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    let settings = Settings {
        analyze_angular_templates: true,
        additional_analyzer_file_extensions: vec!["ng".to_string()],
        ..settings_with_workspace("/ws/app")
    };
    ext.activate(settings).await.unwrap();

    assert_eq!(
        host.selectors_for(Feature::Hover).unwrap(),
        [
            DocumentSelector::Language("dart".into()),
            DocumentSelector::Language("html".into()),
            DocumentSelector::Pattern("**/*.ng".into()),
        ]
    );
    assert_eq!(
        host.selectors_for(Feature::CodeActions).unwrap(),
        [DocumentSelector::Language("dart".into())]
    );
    assert_eq!(
        host.selectors_for(Feature::Implementation).unwrap(),
        [DocumentSelector::Language("dart".into())]
    );
}

#[tokio::test]
async fn failing_registration_does_not_block_the_rest() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    host.fail_registration_of(Feature::Rename);
    let mut ext = extension(&launcher, &host);

    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    assert_eq!(ext.state(), ExtensionState::Active);
    let active = ext.active_registrations();
    assert!(!active.contains(&Feature::Rename));
    assert!(active.contains(&Feature::CodeActions));
    assert_eq!(active.len(), 14);
}

#[tokio::test]
async fn rejected_roots_do_not_fail_activation() {
    let launcher = FakeLauncher::new(ServerScript {
        failing_methods: vec![(
            "analysis.setAnalysisRoots".to_string(),
            "INVALID_PARAMETER".to_string(),
        )],
        ..ServerScript::default()
    });
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    assert_eq!(ext.state(), ExtensionState::Active);
    assert_eq!(ext.analyzer().unwrap().state(), ServerProcessState::Connected);
    assert!(host.errors().is_empty());
}

#[tokio::test]
async fn activating_twice_is_rejected() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    ext.activate(Settings::default()).await.unwrap();
    let err = ext.activate(Settings::default()).await.unwrap_err();

    assert!(matches!(err, ExtensionError::AlreadyActive { .. }));
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn server_exiting_before_handshake_fails_activation_once() {
    let launcher = FakeLauncher::new(ServerScript {
        exit_immediately: true,
        ..ServerScript::default()
    });
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    let err = ext.activate(Settings::default()).await.unwrap_err();

    assert!(matches!(
        err,
        ExtensionError::Analyzer(AnalyzerError::ConnectFailed { .. })
    ));
    assert_eq!(ext.state(), ExtensionState::Inactive);
    assert!(ext.analyzer().is_none());
    assert_eq!(host.errors().len(), 1);
    assert!(host.active().is_empty());
}

#[tokio::test]
async fn missing_handshake_times_out_when_bounded() {
    let launcher = FakeLauncher::new(ServerScript {
        send_handshake: false,
        ..ServerScript::default()
    });
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    let settings = Settings {
        connect_timeout_secs: Some(1),
        ..Settings::default()
    };
    let err = ext.activate(settings).await.unwrap_err();

    assert!(matches!(
        err,
        ExtensionError::Analyzer(AnalyzerError::Timeout(_))
    ));
    assert_eq!(ext.state(), ExtensionState::Inactive);
    assert_eq!(host.errors().len(), 1);
    // Never connected, so no graceful shutdown was attempted.
    assert!(
        launcher
            .latest()
            .requests_for("server.shutdown")
            .is_empty()
    );
}

#[tokio::test]
async fn unexpected_exit_is_reported_once_and_reload_recovers() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let analyzer = ext.analyzer().unwrap().clone();
    let exited = analyzer
        .events()
        .next_where(&[EventKind::ProcessExited], |_| true);
    launcher.latest().crash();
    exited.await.unwrap();

    assert_eq!(host.errors().len(), 1);
    assert!(host.errors()[0].contains("terminated unexpectedly"));
    assert_eq!(analyzer.state(), ServerProcessState::Terminated);
    // The extension stays active until the user reloads.
    assert_eq!(ext.state(), ExtensionState::Active);

    ext.reload().await.unwrap();
    assert_eq!(ext.state(), ExtensionState::Active);
    assert_eq!(ext.analyzer().unwrap().state(), ServerProcessState::Connected);
    assert_eq!(host.errors().len(), 1);
}

#[tokio::test]
async fn next_analysis_resolves_on_idle_status() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    assert!(!ext.next_analysis().await);

    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();
    let server = launcher.latest();

    let next = ext.next_analysis();
    server.push_status(true);
    server.push_status(false);
    assert!(next.await);

    let next = ext.next_analysis();
    server.crash();
    assert!(!next.await);
}

#[tokio::test]
async fn loose_files_warning_is_shown_once_per_generation() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(Settings::default()).await.unwrap();

    ext.document_opened("html");
    assert!(host.warnings().is_empty());

    ext.document_opened("dart");
    ext.document_opened("dart");
    assert_eq!(host.warnings().len(), 1);

    ext.reload().await.unwrap();
    ext.document_opened("dart");
    assert_eq!(host.warnings().len(), 2);
}

#[tokio::test]
async fn no_loose_files_warning_with_a_workspace() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    ext.document_opened("dart");
    assert!(host.warnings().is_empty());
}
