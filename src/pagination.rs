use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::driver::BrowserDriver;
use crate::info_time;

/// Receiving half of the STOP signal. Resolves once the budget is used up,
/// or when the controller is dropped without ever reaching it.
pub type StopSignal = oneshot::Receiver<()>;

/// What recording one accepted response did to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Continue,
    /// The budget was just reached and the STOP signal was sent.
    Stop,
    AlreadyStopped,
}

/// Counts accepted responses against the scroll budget and sends STOP exactly once.
#[derive(Debug)]
pub struct PaginationController {
    accepted: u64,
    budget: i64,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl PaginationController {
    /// A budget of zero or less is exhausted before anything happens,
    /// so the STOP signal is already sent when this returns.
    pub fn new(budget: i64) -> (Self, StopSignal) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut controller = Self {
            accepted: 0,
            budget,
            stop_tx: Some(stop_tx),
        };
        if controller.budget_exhausted() {
            controller.send_stop();
        }
        (controller, stop_rx)
    }

    /// Call once per accepted response, whatever it contained.
    pub fn record_accepted(&mut self) -> Advance {
        self.accepted += 1;
        if self.is_stopped() {
            return Advance::AlreadyStopped;
        }
        if self.budget_exhausted() {
            self.send_stop();
            return Advance::Stop;
        }
        Advance::Continue
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn budget(&self) -> i64 {
        self.budget
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_tx.is_none()
    }

    fn budget_exhausted(&self) -> bool {
        i64::try_from(self.accepted).unwrap_or(i64::MAX) >= self.budget
    }

    fn send_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            info_time!(
                "Reached {} of {} accepted responses, sending STOP signal",
                self.accepted,
                self.budget
            );
            // The scroll task may already be gone, nothing left to stop then.
            let _ = stop_tx.send(());
        }
    }
}

/// Scrolls to the bottom of the page every `every` until the STOP signal resolves.
/// The first scroll happens one full interval after the call.
/// The signal is checked before every tick, so a pending STOP always wins.
/// Returns the number of scrolls that went through.
pub async fn drive_scrolls<D>(driver: Arc<D>, every: Duration, mut stop_rx: StopSignal) -> u64
where
    D: BrowserDriver + ?Sized,
{
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut scrolls = 0;
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => match driver.scroll_to_bottom().await {
                Ok(()) => {
                    scrolls += 1;
                    debug!(scrolls, "scrolled to bottom");
                }
                Err(e) => warn!("scroll failed: {e}"),
            },
        }
    }
    info_time!("Scrolling stopped after {} scrolls", scrolls);
    scrolls
}
