use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const STOP_POLL_STEP: Duration = Duration::from_millis(50);

/// Sleep until `start + duration`, waking early when `stop` is raised.
pub fn sleep_with_stop(duration: Duration, stop: &AtomicBool, start: Instant) {
    let deadline = start + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL_STEP));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_immediately_when_stopped() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        sleep_with_stop(Duration::from_secs(5), &stop, start);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleeps_for_remaining_interval() {
        let stop = AtomicBool::new(false);
        let start = Instant::now();
        sleep_with_stop(Duration::from_millis(60), &stop, start);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
