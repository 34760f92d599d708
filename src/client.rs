use std::sync::Arc;

use crate::balance::BalanceTracker;
use crate::config::ClientConfig;
use crate::derivation::AddressDerivationFlow;
use crate::events::{BackendEvent, EventBus, Subscription};
use crate::gateway::{Backend, ExpiryAwareBackend, RemoteBackend};
use crate::mnemonic::MnemonicFlow;
use crate::navigation::Navigator;
use crate::notifier::Notifier;
use crate::session::{SessionEpoch, SessionManager};
use crate::sync::{ChainPoller, ChainSyncReducer};
use crate::transfer::TransferFlow;
use crate::Result;

/// Wallet Client - Orchestration Layer
///
/// Builds every store once around a shared backend, notifier, navigator and
/// session epoch, and routes backend events to the stores that consume them.
pub struct WalletClient {
    config: ClientConfig,
    backend: Arc<dyn Backend>,
    events: EventBus,
    notifier: Notifier,
    navigator: Navigator,
    epoch: SessionEpoch,
    session: SessionManager,
    sync: ChainSyncReducer,
    balances: BalanceTracker,
    derivation: AddressDerivationFlow,
    mnemonic: MnemonicFlow,
    transfer: TransferFlow,
    dispatch: Option<Subscription>,
    poller: Option<ChainPoller>,
}

impl WalletClient {
    // ============================================================================
    // Constructor
    // ============================================================================

    pub fn new(backend: Arc<dyn Backend>, config: ClientConfig) -> Self {
        let notifier = Notifier::new(
            config.ok_notification_timeout(),
            config.err_notification_timeout(),
        );
        let navigator = Navigator::default();
        let epoch = SessionEpoch::new();
        let events = EventBus::new(config.event_channel_capacity);
        let backend: Arc<dyn Backend> = Arc::new(ExpiryAwareBackend::new(backend, events.clone()));

        let session = SessionManager::new(
            backend.clone(),
            notifier.clone(),
            navigator.clone(),
            epoch.clone(),
        );
        let sync = ChainSyncReducer::new(notifier.clone());
        let balances = BalanceTracker::new(backend.clone(), notifier.clone(), epoch.clone());
        let derivation =
            AddressDerivationFlow::new(backend.clone(), notifier.clone(), epoch.clone());
        let mnemonic = MnemonicFlow::new(backend.clone(), notifier.clone(), &config);
        let transfer = TransferFlow::new(
            backend.clone(),
            notifier.clone(),
            epoch.clone(),
            balances.clone(),
            config.address_debounce(),
        );

        session.register(Arc::new(sync.clone()));
        session.register(Arc::new(balances.clone()));
        session.register(Arc::new(derivation.clone()));
        session.register(Arc::new(transfer.clone()));

        Self {
            config,
            backend,
            events,
            notifier,
            navigator,
            epoch,
            session,
            sync,
            balances,
            derivation,
            mnemonic,
            transfer,
            dispatch: None,
            poller: None,
        }
    }

    /// Client talking to the HTTP backend at `config.backend_url`
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let backend = RemoteBackend::new(config.backend_url.clone(), config.request_timeout())?;
        log::info!("Wallet client using backend at {}", backend.base_url());
        Ok(Self::new(Arc::new(backend), config))
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Start event dispatch and chain polling. Must run inside a tokio runtime.
    pub fn start(&mut self) {
        if self.dispatch.is_none() {
            let session = self.session.clone();
            let sync = self.sync.clone();
            self.dispatch = Some(self.events.subscribe("wallet-client", move |event| match event {
                BackendEvent::SessionExpired => {
                    session.handle_session_expired();
                    Ok(())
                }
                other => sync.apply(other),
            }));
        }

        if self.poller.is_none() {
            let session = self.session.clone();
            self.poller = Some(ChainPoller::start(
                self.backend.clone(),
                self.sync.clone(),
                self.epoch.clone(),
                self.config.chain_poll_interval(),
                move || session.is_unlocked(),
            ));
        }
        log::info!("Wallet client started");
    }

    pub fn is_running(&self) -> bool {
        self.dispatch.as_ref().is_some_and(Subscription::is_active)
    }

    /// Stop background tasks and lock the session
    pub fn shutdown(&mut self) {
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.unsubscribe();
        }
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        self.session.lock();
        self.notifier.shutdown();
        log::info!("Wallet client stopped");
    }

    // ============================================================================
    // Stores
    // ============================================================================

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn sync(&self) -> &ChainSyncReducer {
        &self.sync
    }

    pub fn balances(&self) -> &BalanceTracker {
        &self.balances
    }

    pub fn derivation(&self) -> &AddressDerivationFlow {
        &self.derivation
    }

    pub fn mnemonic(&self) -> &MnemonicFlow {
        &self.mnemonic
    }

    pub fn transfer(&self) -> &TransferFlow {
        &self.transfer
    }

    /// Latest Ethereum chain info seen by the poller
    pub fn latest_chain_info(&self) -> Option<crate::types::ChainInfo> {
        self.poller.as_ref().and_then(ChainPoller::latest)
    }
}
