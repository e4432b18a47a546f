//! Adaptive polling.
//!
//! The scheduler drives [`Feed::cycle`] from a single timer whose period
//! depends on whether anybody is watching:
//!
//! * **Active**: at least one subscriber; poll every `active_interval`.
//! * **Idle**: no subscribers; poll every `idle_interval`.
//!
//! The mode is re-evaluated after every poll and right away when a
//! subscriber connects, so a new subscriber does not wait out a long idle
//! period. A disconnect is only noticed at the next poll. Switching modes
//! re-arms the one timer in place; there is never more than one.

use std::{fmt, pin::Pin, sync::Arc, time::Duration};

use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use crate::{config::Config, feed::Feed};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Idle,
    Active,
}

impl Mode {
    /// The mode for `subscribers` connected subscribers.
    #[must_use]
    pub fn for_subscribers(subscribers: usize) -> Self {
        if subscribers > 0 {
            Self::Active
        } else {
            Self::Idle
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => write!(f, "idle"),
            Mode::Active => write!(f, "active"),
        }
    }
}

pub struct AdaptiveScheduler {
    feed: Arc<Feed>,
    active_interval: Duration,
    idle_interval: Duration,
    mode: Mode,
    retunes: usize,
}

impl AdaptiveScheduler {
    #[must_use]
    pub fn new(feed: Arc<Feed>, active_interval: Duration, idle_interval: Duration) -> Self {
        let mode = Mode::for_subscribers(feed.registry().size());

        Self {
            feed,
            active_interval,
            idle_interval,
            mode,
            retunes: 0,
        }
    }

    #[must_use]
    pub fn from_config(feed: Arc<Feed>, config: &Config) -> Self {
        Self::new(feed, config.active_interval, config.idle_interval)
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of mode switches so far.
    #[must_use]
    pub fn retunes(&self) -> usize {
        self.retunes
    }

    /// The poll period of the current mode.
    #[must_use]
    pub fn period(&self) -> Duration {
        match self.mode {
            Mode::Active => self.active_interval,
            Mode::Idle => self.idle_interval,
        }
    }

    /// Polls until `shutdown` fires or the token guard halts.
    ///
    /// The first poll happens immediately. Poll failures are logged and the
    /// next poll is attempted on schedule.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let halted = self.feed.guard().halted();

        self.mode = Mode::for_subscribers(self.feed.registry().size());
        info!(
            "polling every {:.1}s while {}",
            self.period().as_secs_f32(),
            self.mode
        );

        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                // Prioritize shutdown signals.
                biased;

                () = shutdown.cancelled() => {
                    debug!("poller shutting down");
                    break;
                }

                () = halted.cancelled() => {
                    error!("poller stopped: token guard halted");
                    break;
                }

                () = self.feed.registry().connected() => {
                    if self.retune() {
                        self.rearm(timer.as_mut());
                    }
                }

                () = &mut timer => {
                    if let Err(e) = self.feed.cycle().await {
                        warn!("polling failed: {e}");
                    }

                    self.retune();
                    self.rearm(timer.as_mut());
                }
            }
        }
    }

    /// Re-reads the subscriber count and switches modes if needed.
    ///
    /// Returns whether the mode changed.
    fn retune(&mut self) -> bool {
        let subscribers = self.feed.registry().size();
        let target = Mode::for_subscribers(subscribers);
        if target == self.mode {
            return false;
        }

        self.mode = target;
        self.retunes += 1;
        info!(
            "{subscribers} subscriber(s); polling every {:.1}s",
            self.period().as_secs_f32()
        );
        true
    }

    fn rearm(&self, timer: Pin<&mut Sleep>) {
        timer.reset(Instant::now() + self.period());
    }
}
