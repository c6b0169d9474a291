//! Display filter owned by the UI.
//!
//! The UI is the only writer, through `FilterControl`; the runtime holds the
//! receiving end of the watch channel and re-renders as soon as the value
//! changes, without waiting for the feed.

use crate::vehicle::VehicleState;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// User-controlled display filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFilter {
    /// Hide vehicles flagged as ghosts
    pub hide_ghosts: bool,
}

impl DisplayFilter {
    pub fn new(hide_ghosts: bool) -> Self {
        Self { hide_ghosts }
    }

    /// True if the vehicle passes the filter.
    #[inline]
    pub fn admits(&self, vehicle: &VehicleState) -> bool {
        !(self.hide_ghosts && vehicle.is_ghost)
    }
}

/// Writer handle for the display filter.
pub struct FilterControl {
    tx: watch::Sender<DisplayFilter>,
}

/// Creates the filter channel: the control goes to the UI, the receiver to
/// the runtime.
pub fn filter_channel(initial: DisplayFilter) -> (FilterControl, watch::Receiver<DisplayFilter>) {
    let (tx, rx) = watch::channel(initial);
    (FilterControl { tx }, rx)
}

impl FilterControl {
    /// Flips "hide ghost vehicles" and returns the new value.
    pub fn toggle_hide_ghosts(&self) -> bool {
        let mut hidden = false;
        self.tx.send_modify(|filter| {
            filter.hide_ghosts = !filter.hide_ghosts;
            hidden = filter.hide_ghosts;
        });
        hidden
    }

    /// Sets "hide ghost vehicles". Receivers are only woken on an actual change.
    pub fn set_hide_ghosts(&self, hide: bool) {
        self.tx.send_if_modified(|filter| {
            let changed = filter.hide_ghosts != hide;
            filter.hide_ghosts = hide;
            changed
        });
    }

    /// Current value.
    pub fn current(&self) -> DisplayFilter {
        *self.tx.borrow()
    }

    /// Another receiver (e.g. for a status bar).
    pub fn subscribe(&self) -> watch::Receiver<DisplayFilter> {
        self.tx.subscribe()
    }
}
