//! Wiring of keyring and session guard over one host store

use crate::keyring::{Keyring, KeyringError};
use crate::session::{
    ActivitySender, Clock, SessionError, SessionGuard, SessionHandle, SessionPolicy, SystemClock,
};
use crate::store::KeyValueStore;
use crate::vault::KdfParams;
use std::sync::{Arc, Mutex, PoisonError};

/// Tunables of an [`IdentityContext`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentitySettings {
    pub kdf: KdfParams,
    pub session: SessionPolicy,
}

/// The identity subsystem of one client instance.
///
/// Built once at startup and shared by reference; session expiry locks the
/// keyring.
pub struct IdentityContext {
    keyring: Arc<Keyring>,
    session: Arc<SessionGuard>,
    handle: Mutex<Option<SessionHandle>>,
}

impl IdentityContext {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: IdentitySettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        settings: IdentitySettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keyring: Arc::new(Keyring::new(store.clone(), settings.kdf)),
            session: Arc::new(SessionGuard::with_clock(settings.session, store, clock)),
            handle: Mutex::new(None),
        }
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn session(&self) -> &Arc<SessionGuard> {
        &self.session
    }

    /// Start inactivity monitoring; expiry locks the keyring.
    ///
    /// Must be called from within a tokio runtime. Returns the sender the
    /// host feeds activity signals into.
    pub fn begin_session(&self) -> Result<ActivitySender, SessionError> {
        let keyring = Arc::downgrade(&self.keyring);
        let handle = self.session.start(move || {
            if let Some(keyring) = keyring.upgrade() {
                keyring.lock();
                log::info!("Keyring locked after inactivity");
            }
        })?;
        let sender = handle.activity_sender();
        *self.lock_handle() = Some(handle);
        Ok(sender)
    }

    /// Lock and stop monitoring, keeping the stored identity
    pub fn shutdown(&self) {
        self.keyring.lock();
        self.end_session();
    }

    /// Lock, stop monitoring and erase everything persisted
    pub fn logout(&self) -> Result<(), KeyringError> {
        self.keyring.lock();
        self.end_session();
        self.keyring.forget()?;
        self.session.clear_activity()?;
        log::info!("Logged out");
        Ok(())
    }

    fn end_session(&self) {
        // Dropping the handle cancels its poller
        self.lock_handle().take();
        self.session.stop();
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<SessionHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
