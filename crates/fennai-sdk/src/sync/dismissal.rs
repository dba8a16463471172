//! 横幅忽略记录
//!
//! 按角色记录忽略时间，窗口内对账直接返回 `Idle`。

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::storage::kv::{keys, PreferenceStore, PreferenceStoreExt};
use crate::utils::clock::{Clock, MILLIS_PER_DAY};

/// 默认忽略窗口：24 小时
pub const DEFAULT_DISMISS_WINDOW: Duration = Duration::from_millis(MILLIS_PER_DAY as u64);

#[derive(Clone)]
pub struct DismissalStore {
    prefs: Arc<dyn PreferenceStore>,
    clock: Arc<dyn Clock>,
    window_millis: i64,
}

impl DismissalStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_window(prefs, clock, DEFAULT_DISMISS_WINDOW)
    }

    pub fn with_window(prefs: Arc<dyn PreferenceStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            prefs,
            clock,
            window_millis: window.as_millis() as i64,
        }
    }

    /// 记录忽略，返回记录的时间戳
    pub fn dismiss(&self, owner_id: &str) -> Result<i64> {
        let now = self.clock.now_millis();
        self.prefs.set_json(&keys::banner_dismissed(owner_id), &now)?;
        debug!("横幅已忽略: owner={}, at={}", owner_id, now);
        Ok(now)
    }

    pub fn dismissed_at(&self, owner_id: &str) -> Result<Option<i64>> {
        self.prefs.get_json(&keys::banner_dismissed(owner_id))
    }

    /// 是否仍在忽略窗口内
    pub fn is_dismissed(&self, owner_id: &str) -> Result<bool> {
        Ok(match self.dismissed_at(owner_id)? {
            Some(at) => self.clock.now_millis() - at < self.window_millis,
            None => false,
        })
    }

    pub fn clear(&self, owner_id: &str) -> Result<()> {
        self.prefs.remove(&keys::banner_dismissed(owner_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryPreferenceStore;
    use crate::utils::clock::{ManualClock, MILLIS_PER_HOUR};

    #[test]
    fn test_window_boundaries() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = DismissalStore::new(Arc::new(MemoryPreferenceStore::new()), clock.clone());

        assert!(!store.is_dismissed("x").unwrap());
        store.dismiss("x").unwrap();
        assert!(store.is_dismissed("x").unwrap());

        clock.advance_millis(24 * MILLIS_PER_HOUR - 1);
        assert!(store.is_dismissed("x").unwrap());
        clock.advance_millis(1);
        assert!(!store.is_dismissed("x").unwrap());
    }

    #[test]
    fn test_clear_and_custom_window() {
        let clock = Arc::new(ManualClock::new(0));
        let store = DismissalStore::with_window(
            Arc::new(MemoryPreferenceStore::new()),
            clock.clone(),
            Duration::from_secs(60),
        );
        store.dismiss("x").unwrap();
        clock.advance_millis(59_000);
        assert!(store.is_dismissed("x").unwrap());
        store.clear("x").unwrap();
        assert!(!store.is_dismissed("x").unwrap());
        assert_eq!(store.dismissed_at("x").unwrap(), None);
    }
}
