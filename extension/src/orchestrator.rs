//! Extension orchestrator: activation, capability-gated wiring and silent reload.
//!
//! ```text
//! Inactive → Activating → Active → Deactivating → Activating (reload)
//!                                              └→ Inactive   (final)
//! ```
//!
//! Each activation builds a fresh `Analyzer` and a fresh registration set.
//! Nothing is carried over from the previous generation except settings.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tether_analyzer::protocol::AVAILABLE_SUGGESTION_SETS;
use tether_analyzer::{
    AnalysisRootManager, Analyzer, AnalyzerError, EventKind, ServerEvent, Subscription,
};
use tether_types::{
    AnalysisRootSet, Disposable, ExtensionState, Registration, RestartFingerprint,
    ServerCapabilities, Settings,
};

use crate::error::ExtensionError;
use crate::features::{FEATURE_TABLE, Feature};
use crate::host::{
    EditorHost, PRIMARY_LANGUAGE, PROJECT_LOADED_CONTEXT, RegistrationContext, selectors_for,
};
use crate::launcher::ServerLauncher;

const ANALYSIS_SUBSYSTEM: &str = "analysis";

const LOOSE_FILES_WARNING: &str = "For full language support, open a folder containing your \
                                   source files instead of individual loose files";

/// What a settings change caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOutcome {
    /// Nothing relevant changed, or the extension is not active.
    Unchanged,
    /// A soft setting changed; the server was asked to reanalyze.
    Reanalyzed,
    /// Workspace folders or exclusions changed; new roots were pushed.
    /// Any reanalysis needed at the same time was issued too.
    RootsUpdated,
    /// A restart-requiring setting changed; the extension was reloaded.
    Reloaded,
}

/// One activation's worth of state.
struct Session {
    analyzer: Analyzer,
    capabilities: Arc<ServerCapabilities>,
    roots: AnalysisRootManager,
    registrations: Vec<(Feature, Registration)>,
    watchers: Vec<Subscription>,
    warned_loose_files: bool,
}

impl Session {
    /// Dispose everything this generation created, then stop its server.
    ///
    /// A failing or panicking disposer is logged and skipped.
    async fn teardown(mut self) {
        for watcher in &self.watchers {
            watcher.dispose();
        }

        let mut failures = 0usize;
        while let Some((feature, mut registration)) = self.registrations.pop() {
            match catch_unwind(AssertUnwindSafe(|| registration.dispose())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(%feature, "Failed to dispose registration: {e:#}");
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(%feature, "Registration disposer panicked");
                }
            }
        }
        if failures > 0 {
            tracing::warn!(failures, "Teardown continued past failing disposers");
        }

        self.analyzer.stop().await;
    }
}

/// Tell the user about a lost or failed server, once per generation.
fn report_failure(host: &dyn EditorHost, reported: &AtomicBool, message: &str) {
    if !reported.swap(true, Ordering::SeqCst) {
        host.show_error(message);
    }
}

pub struct Extension<L, H> {
    launcher: L,
    host: Arc<H>,
    noisy_dirs: Option<Vec<PathBuf>>,
    state: ExtensionState,
    settings: Settings,
    fingerprint: RestartFingerprint,
    generation: u64,
    session: Option<Session>,
}

impl<L, H> Extension<L, H>
where
    L: ServerLauncher,
    H: EditorHost,
{
    #[must_use]
    pub fn new(launcher: L, host: Arc<H>) -> Self {
        let settings = Settings::default();
        Self {
            launcher,
            host,
            noisy_dirs: None,
            state: ExtensionState::Inactive,
            fingerprint: settings.restart_fingerprint(),
            settings,
            generation: 0,
            session: None,
        }
    }

    /// Use these high-churn directories instead of reading them from the environment.
    #[must_use]
    pub fn with_noisy_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.noisy_dirs = Some(dirs);
        self
    }

    #[must_use]
    pub fn state(&self) -> ExtensionState {
        self.state
    }

    /// Number of activations started so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// The current generation's analyzer, if one is active.
    #[must_use]
    pub fn analyzer(&self) -> Option<&Analyzer> {
        self.session.as_ref().map(|s| &s.analyzer)
    }

    /// Capabilities captured at the last connect, or the empty set when inactive.
    #[must_use]
    pub fn current_capabilities(&self) -> Arc<ServerCapabilities> {
        self.session.as_ref().map_or_else(
            || Arc::new(ServerCapabilities::empty()),
            |s| Arc::clone(&s.capabilities),
        )
    }

    /// Features registered by the current generation, in registration order.
    #[must_use]
    pub fn active_registrations(&self) -> Vec<Feature> {
        self.session
            .as_ref()
            .map(|s| s.registrations.iter().map(|(f, _)| *f).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn analysis_roots(&self) -> Option<&AnalysisRootSet> {
        self.session.as_ref().map(|s| s.roots.current())
    }

    /// Start a server for `settings`, wait for its handshake and wire every
    /// enabled feature.
    pub async fn activate(&mut self, settings: Settings) -> Result<(), ExtensionError> {
        if !matches!(
            self.state,
            ExtensionState::Inactive | ExtensionState::Deactivating
        ) {
            return Err(ExtensionError::AlreadyActive { state: self.state });
        }

        self.state = ExtensionState::Activating;
        self.generation += 1;
        self.fingerprint = settings.restart_fingerprint();
        self.settings = settings;
        tracing::info!(generation = self.generation, "Activating extension");

        let analyzer = Analyzer::new();
        let reported = Arc::new(AtomicBool::new(false));
        let exit_watch = self.watch_for_exit(&analyzer, &reported);

        let capabilities = match self.connect(&analyzer).await {
            Ok(capabilities) => capabilities,
            Err(err) => {
                tracing::warn!("Activation failed: {err}");
                report_failure(self.host.as_ref(), &reported, &err.to_string());
                analyzer.stop().await;
                exit_watch.dispose();
                self.state = ExtensionState::Inactive;
                return Err(err);
            }
        };

        let mut roots = self.root_manager();
        roots.recompute(&self.settings.workspace_folders);
        if let Err(e) = roots.push(&analyzer).await {
            tracing::warn!("Failed to set analysis roots: {e}");
        }

        let registrations = self.register_features(&analyzer, &capabilities);
        if registrations
            .iter()
            .any(|(feature, _)| *feature == Feature::AvailableSuggestions)
            && let Err(e) = analyzer
                .set_subscriptions(&[AVAILABLE_SUGGESTION_SETS])
                .await
        {
            tracing::warn!("Failed to subscribe to suggestion sets: {e}");
        }

        self.host.set_context(PROJECT_LOADED_CONTEXT, true);
        tracing::info!(
            generation = self.generation,
            version = capabilities.version(),
            features = registrations.len(),
            "Extension active"
        );

        self.session = Some(Session {
            analyzer,
            capabilities,
            roots,
            registrations,
            watchers: vec![exit_watch],
            warned_loose_files: false,
        });
        self.state = ExtensionState::Active;
        Ok(())
    }

    async fn connect(&self, analyzer: &Analyzer) -> Result<Arc<ServerCapabilities>, ExtensionError> {
        self.launcher.launch(analyzer, &self.settings).await?;
        let capabilities = match self.settings.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, analyzer.wait_connected())
                .await
                .map_err(|_| AnalyzerError::Timeout(limit))??,
            None => analyzer.wait_connected().await?,
        };
        Ok(capabilities)
    }

    fn watch_for_exit(&self, analyzer: &Analyzer, reported: &Arc<AtomicBool>) -> Subscription {
        let host = Arc::clone(&self.host);
        let reported = Arc::clone(reported);
        let generation = self.generation;
        analyzer.events().on(EventKind::ProcessExited, move |event| {
            if let ServerEvent::ProcessExited {
                code,
                signal,
                expected: false,
            } = event
            {
                tracing::warn!(generation, ?code, ?signal, "Analysis server exited unexpectedly");
                report_failure(
                    host.as_ref(),
                    &reported,
                    "The analysis server terminated unexpectedly. Reload to restart it.",
                );
            }
        })
    }

    fn root_manager(&self) -> AnalysisRootManager {
        let exclude = self.settings.exclude_noisy_ancestors();
        match &self.noisy_dirs {
            Some(dirs) => {
                AnalysisRootManager::with_noisy_dirs(exclude, dirs.iter().cloned().map(Some))
            }
            None => AnalysisRootManager::from_env(exclude),
        }
    }

    fn register_features(
        &self,
        analyzer: &Analyzer,
        capabilities: &Arc<ServerCapabilities>,
    ) -> Vec<(Feature, Registration)> {
        let mut registrations = Vec::new();
        for entry in FEATURE_TABLE {
            if !entry.enabled(capabilities, &self.settings) {
                tracing::debug!(feature = %entry.feature, "Skipping feature: unsupported or disabled");
                continue;
            }
            let context = RegistrationContext {
                analyzer: analyzer.clone(),
                capabilities: Arc::clone(capabilities),
                selectors: selectors_for(entry.scope, &self.settings),
            };
            match self.host.register(entry.feature, &context) {
                Ok(registration) => registrations.push((entry.feature, registration)),
                Err(e) => {
                    tracing::warn!(feature = %entry.feature, "Failed to register feature: {e:#}");
                }
            }
        }
        registrations
    }

    /// Dispose every registration and stop the server.
    ///
    /// With `is_restart` the extension stays in `Deactivating`, ready for the
    /// next `activate`; otherwise it ends `Inactive`.
    pub async fn deactivate(&mut self, is_restart: bool) {
        self.host.set_context(PROJECT_LOADED_CONTEXT, false);

        let Some(session) = self.session.take() else {
            self.state = ExtensionState::Inactive;
            return;
        };

        self.state = ExtensionState::Deactivating;
        tracing::info!(generation = self.generation, is_restart, "Deactivating extension");
        session.teardown().await;

        if !is_restart {
            self.state = ExtensionState::Inactive;
        }
    }

    /// Tear everything down and activate again with the current settings.
    pub async fn reload(&mut self) -> Result<(), ExtensionError> {
        tracing::info!("Performing silent extension reload...");
        self.deactivate(true).await;
        let settings = self.settings.clone();
        self.activate(settings).await?;
        tracing::info!("Reload complete");
        Ok(())
    }

    /// Apply new settings with the narrowest effect that covers the change.
    pub async fn settings_changed(
        &mut self,
        settings: Settings,
    ) -> Result<SettingsOutcome, ExtensionError> {
        let previous = std::mem::replace(&mut self.settings, settings);
        if self.state != ExtensionState::Active {
            self.fingerprint = self.settings.restart_fingerprint();
            return Ok(SettingsOutcome::Unchanged);
        }

        if self.settings.restart_fingerprint() != self.fingerprint {
            tracing::info!("Settings requiring a restart changed");
            self.reload().await?;
            return Ok(SettingsOutcome::Reloaded);
        }

        let roots_changed = previous.workspace_folders != self.settings.workspace_folders
            || previous.exclude_noisy_ancestors() != self.settings.exclude_noisy_ancestors();
        let todos_changed = previous.show_todos != self.settings.show_todos;

        let roots = roots_changed.then(|| self.root_manager());
        let session = self.session.as_mut().ok_or(ExtensionError::NotActive)?;

        // Each action runs even if the other fails. A failed part is not
        // committed, so applying the same settings again retries it.
        let mut outcome = SettingsOutcome::Unchanged;
        let mut failure: Option<ExtensionError> = None;
        if todos_changed {
            match session.analyzer.reanalyze().await {
                Ok(()) => outcome = SettingsOutcome::Reanalyzed,
                Err(e) => {
                    tracing::warn!("Reanalyze after settings change failed: {e}");
                    self.settings.show_todos = previous.show_todos;
                    failure = Some(e.into());
                }
            }
        }
        if let Some(mut roots) = roots {
            roots.recompute(&self.settings.workspace_folders);
            match roots.push(&session.analyzer).await {
                Ok(()) => {
                    session.roots = roots;
                    outcome = SettingsOutcome::RootsUpdated;
                }
                Err(e) => {
                    tracing::warn!("Pushing analysis roots after settings change failed: {e}");
                    self.settings.workspace_folders = previous.workspace_folders;
                    self.settings.exclude_noisy_ancestors = previous.exclude_noisy_ancestors;
                    if failure.is_none() {
                        failure = Some(e.into());
                    }
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    /// Resolves with `true` when analysis next reports idle, or `false` if
    /// the server goes away first or nothing is active.
    pub fn next_analysis(&self) -> impl Future<Output = bool> + Send + 'static {
        let next = self
            .analyzer()
            .map(|analyzer| analyzer.next_idle(ANALYSIS_SUBSYSTEM));
        async move {
            match next {
                Some(next) => next.await,
                None => false,
            }
        }
    }

    pub async fn reanalyze(&self) -> Result<(), ExtensionError> {
        let analyzer = self.analyzer().ok_or(ExtensionError::NotActive)?;
        analyzer.reanalyze().await?;
        Ok(())
    }

    /// Fail every in-flight request of the current generation.
    pub async fn cancel_all_requests(&self) -> usize {
        match self.analyzer() {
            Some(analyzer) => analyzer.cancel_all_requests().await,
            None => 0,
        }
    }

    /// Warn once per generation when a primary-language file is opened while
    /// nothing is being analyzed.
    pub fn document_opened(&mut self, language_id: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if language_id == PRIMARY_LANGUAGE
            && session.roots.current().is_empty()
            && !session.warned_loose_files
        {
            session.warned_loose_files = true;
            self.host.show_warning(LOOSE_FILES_WARNING);
        }
    }
}
