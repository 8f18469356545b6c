//! Settings changes: reanalyze, root updates and restart-requiring edits

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tether_extension::{Extension, Feature, SettingsOutcome};
use tether_types::{ExtensionState, Settings, WorkspaceFolder};

use crate::common::{FakeLauncher, RecordingHost, ServerScript, settings_with_workspace};

fn extension(launcher: &FakeLauncher, host: &Arc<RecordingHost>) -> Extension<FakeLauncher, RecordingHost> {
    Extension::new(launcher.clone(), Arc::clone(host)).with_noisy_dirs(Vec::new())
}

#[tokio::test]
async fn identical_settings_change_nothing() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    let settings = settings_with_workspace("/ws/app");
    ext.activate(settings.clone()).await.unwrap();
    let before = launcher.latest().requests().len();

    let outcome = ext.settings_changed(settings).await.unwrap();

    assert_eq!(outcome, SettingsOutcome::Unchanged);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(launcher.latest().requests().len(), before);
}

#[tokio::test]
async fn todo_toggle_only_reanalyzes() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let outcome = ext
        .settings_changed(Settings {
            show_todos: false,
            ..settings_with_workspace("/ws/app")
        })
        .await
        .unwrap();

    assert_eq!(outcome, SettingsOutcome::Reanalyzed);
    assert_eq!(launcher.launches(), 1);
    assert_eq!(ext.generation(), 1);
    assert_eq!(launcher.latest().requests_for("analysis.reanalyze").len(), 1);
    assert!(!ext.settings().show_todos);
}

#[tokio::test]
async fn workspace_change_pushes_new_roots_without_restart() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let mut settings = settings_with_workspace("/ws/app");
    settings
        .workspace_folders
        .push(WorkspaceFolder::new("/ws/lib").with_exclusions(["build"]));
    let outcome = ext.settings_changed(settings).await.unwrap();

    assert_eq!(outcome, SettingsOutcome::RootsUpdated);
    assert_eq!(launcher.launches(), 1);

    let pushes = launcher.latest().requests_for("analysis.setAnalysisRoots");
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1]["params"]["included"], json!(["/ws/app", "/ws/lib"]));
    assert_eq!(pushes[1]["params"]["excluded"], json!(["/ws/lib/build"]));

    let roots = ext.analysis_roots().unwrap();
    assert_eq!(
        roots.included,
        [PathBuf::from("/ws/app"), PathBuf::from("/ws/lib")]
    );
}

#[tokio::test]
async fn noisy_directories_are_excluded_when_enabled() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = Extension::new(launcher.clone(), Arc::clone(&host))
        .with_noisy_dirs(vec![PathBuf::from("/home/user/AppData")]);

    let settings = Settings {
        exclude_noisy_ancestors: Some(true),
        workspace_folders: vec![WorkspaceFolder::new("/home/user")],
        ..Settings::default()
    };
    ext.activate(settings.clone()).await.unwrap();

    let pushes = launcher.latest().requests_for("analysis.setAnalysisRoots");
    assert_eq!(pushes[0]["params"]["excluded"], json!(["/home/user/AppData"]));

    // Turning the flag off is a root change, not a restart.
    let outcome = ext
        .settings_changed(Settings {
            exclude_noisy_ancestors: Some(false),
            ..settings
        })
        .await
        .unwrap();
    assert_eq!(outcome, SettingsOutcome::RootsUpdated);
    let pushes = launcher.latest().requests_for("analysis.setAnalysisRoots");
    assert_eq!(pushes[1]["params"]["excluded"], json!([]));
}

#[tokio::test]
async fn restart_setting_triggers_a_silent_reload() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();
    assert!(host.active().contains(&Feature::ClosingLabels));

    let outcome = ext
        .settings_changed(Settings {
            closing_labels: false,
            ..settings_with_workspace("/ws/app")
        })
        .await
        .unwrap();

    assert_eq!(outcome, SettingsOutcome::Reloaded);
    assert_eq!(ext.state(), ExtensionState::Active);
    assert_eq!(launcher.launches(), 2);
    assert_eq!(ext.generation(), 2);
    assert!(!host.active().contains(&Feature::ClosingLabels));
    assert_eq!(host.active(), ext.active_registrations());
}

#[tokio::test]
async fn changing_extra_server_arguments_reloads() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let outcome = ext
        .settings_changed(Settings {
            analyzer_additional_args: vec!["--verbose".to_string()],
            ..settings_with_workspace("/ws/app")
        })
        .await
        .unwrap();

    assert_eq!(outcome, SettingsOutcome::Reloaded);
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test]
async fn settings_stored_while_inactive_apply_on_next_activation() {
    let launcher = FakeLauncher::new(ServerScript::default());
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);

    let outcome = ext
        .settings_changed(Settings {
            closing_labels: false,
            ..settings_with_workspace("/ws/app")
        })
        .await
        .unwrap();
    assert_eq!(outcome, SettingsOutcome::Unchanged);
    assert_eq!(launcher.launches(), 0);

    ext.reload().await.unwrap();
    assert!(!host.active().contains(&Feature::ClosingLabels));
}

#[tokio::test]
async fn rejected_reanalyze_still_pushes_new_roots_and_is_retried() {
    let launcher = FakeLauncher::new(ServerScript {
        failing_methods: vec![(
            "analysis.reanalyze".to_string(),
            "SERVER_ERROR".to_string(),
        )],
        ..ServerScript::default()
    });
    let host = RecordingHost::new();
    let mut ext = extension(&launcher, &host);
    ext.activate(settings_with_workspace("/ws/app")).await.unwrap();

    let mut changed = settings_with_workspace("/ws/app");
    changed.show_todos = false;
    changed.workspace_folders.push(WorkspaceFolder::new("/ws/lib"));

    assert!(ext.settings_changed(changed.clone()).await.is_err());

    let server = launcher.latest();
    let pushes = server.requests_for("analysis.setAnalysisRoots");
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1]["params"]["included"], json!(["/ws/app", "/ws/lib"]));
    assert_eq!(
        ext.analysis_roots().unwrap().included,
        [PathBuf::from("/ws/app"), PathBuf::from("/ws/lib")]
    );
    // The failed part is not committed.
    assert!(ext.settings().show_todos);

    // Applying the same settings again retries only what failed.
    assert!(ext.settings_changed(changed).await.is_err());
    assert_eq!(server.requests_for("analysis.reanalyze").len(), 2);
    assert_eq!(server.requests_for("analysis.setAnalysisRoots").len(), 2);
}

#[tokio::test]
async fn rejected_roots_push_is_retried_on_the_next_change() {
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

    let mut changed = settings_with_workspace("/ws/app");
    changed.workspace_folders.push(WorkspaceFolder::new("/ws/lib"));

    assert!(ext.settings_changed(changed.clone()).await.is_err());
    assert_eq!(ext.settings().workspace_folders.len(), 1);

    assert!(ext.settings_changed(changed).await.is_err());
    assert_eq!(
        launcher
            .latest()
            .requests_for("analysis.setAnalysisRoots")
            .len(),
        3
    );
}
