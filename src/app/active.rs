use std::sync::Mutex;

/// Process-local "sticky" device id reused by calls that name no device.
#[derive(Debug, Default)]
pub struct ActiveDevice {
    id: Mutex<Option<String>>,
}

impl ActiveDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.id.lock().unwrap_or_else(|err| err.into_inner()).clone()
    }

    pub fn set(&self, udid: &str) {
        *self.id.lock().unwrap_or_else(|err| err.into_inner()) = Some(udid.to_string());
    }

    /// Clears the handle only if it still points at `udid`.
    pub fn clear_if(&self, udid: &str) -> bool {
        let mut guard = self.id.lock().unwrap_or_else(|err| err.into_inner());
        if guard.as_deref() == Some(udid) {
            *guard = None;
            return true;
        }
        false
    }
}
