//! Paced, single-consumer playback of the step stream.
//!
//! Raw messages are routed as they arrive: steps wait in a FIFO
//! [`PendingQueue`] and are applied one per pacing interval, while the
//! terminal summary skips the queue and is published immediately. Steps
//! still queued behind a summary keep draining at the normal pace.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer};
use tracing::{debug, info, trace};

use crate::{
    protocol::{self, ProtocolError, StepMessage, StreamMessage},
    world::{StepReport, World},
};

/// Share of the pacing interval a drone spends moving between cells, in tenths.
const MOVE_TENTHS: u32 = 7;

/// Timing of the playback loop.
///
/// Deserializes from a table of millisecond values; missing keys keep
/// their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Minimum wall-clock gap between two applied steps.
    #[serde(rename = "pacing_ms", deserialize_with = "millis")]
    pub interval: Duration,
    /// Lower bound of a drone move animation.
    #[serde(rename = "min_move_ms", deserialize_with = "millis")]
    pub min_move: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        PacingConfig {
            interval: Duration::from_millis(300),
            min_move: Duration::from_millis(50),
        }
    }
}

impl PacingConfig {
    /// Duration of a move animation: `max(min_move, interval * 0.7)`.
    pub fn move_duration(&self) -> Duration {
        (self.interval * MOVE_TENTHS / 10).max(self.min_move)
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// FIFO buffer of steps waiting to be applied.
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    steps: VecDeque<StepMessage>,
}

impl PendingQueue {
    pub fn push(&mut self, step: StepMessage) {
        self.steps.push_back(step);
    }

    pub fn pop(&mut self) -> Option<StepMessage> {
        self.steps.pop_front()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }
}

/// What a raw message turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Queued { step_index: u64 },
    Finished { published: bool },
    Ignored,
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Nothing queued; the next arriving step applies on the next tick.
    Idle,
    /// A step is queued but the pacing interval has not elapsed yet.
    Waiting { remaining: Duration },
    Advanced(StepReport),
}

/// Applies queued steps to a [`World`] at a fixed pace.
#[derive(Debug)]
pub struct Playback {
    pacing: PacingConfig,
    queue: PendingQueue,
    last_advance: Option<Instant>,
}

impl Playback {
    pub fn new(pacing: PacingConfig) -> Self {
        Playback {
            pacing,
            queue: PendingQueue::default(),
            last_advance: None,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&mut self, step: StepMessage) {
        self.queue.push(step);
    }

    /// Decodes one raw stream message and routes it.
    ///
    /// A malformed message leaves all state untouched; the caller decides how
    /// to report it.
    pub fn route_raw(&mut self, text: &str, world: &mut World) -> Result<Routed, ProtocolError> {
        let message = protocol::decode(text)?;
        Ok(self.route(message, world))
    }

    pub fn route(&mut self, message: StreamMessage, world: &mut World) -> Routed {
        trace!(kind = message.kind(), "Routing stream message");
        match message {
            StreamMessage::Step(step) => {
                let step_index = step.step_index;
                self.enqueue(step);
                Routed::Queued { step_index }
            }
            StreamMessage::Done { summary } => {
                info!(queued = self.queue.len(), "Terminal summary received");
                Routed::Finished {
                    published: world.finalize(&summary),
                }
            }
            StreamMessage::Init(_) => {
                debug!("Ignoring stream init; world already initialized");
                Routed::Ignored
            }
        }
    }

    /// Applies at most one queued step if the pacing interval allows it.
    pub fn tick(&mut self, now: Instant, world: &mut World) -> Tick {
        if let Some(last) = self.last_advance {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.pacing.interval {
                return if self.queue.is_empty() {
                    Tick::Idle
                } else {
                    Tick::Waiting {
                        remaining: self.pacing.interval - elapsed,
                    }
                };
            }
        }

        let Some(step) = self.queue.pop() else {
            return Tick::Idle;
        };
        let report = world.apply_step(&step, now, self.pacing.move_duration());
        self.last_advance = Some(now);
        Tick::Advanced(report)
    }

    /// Drops queued steps and forgets pacing history for a new episode.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.last_advance = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Position,
        overlay::CellMark,
        protocol::{DroneStart, DroneUpdate, InitPayload},
    };

    fn world() -> World {
        World::from_init(&InitPayload {
            grid_size: [3, 3],
            terrain: vec![],
            drones: vec![DroneStart {
                id: 0,
                pos: Position::new(0, 0),
            }],
            seen: vec![],
            bandits: vec![],
        })
        .unwrap()
    }

    fn step(index: u64, x: usize, y: usize) -> StepMessage {
        StepMessage {
            step_index: index,
            coverage: index as f64 / 10.0,
            drones: vec![DroneUpdate {
                id: 0,
                pos: Position::new(x, y),
                action: format!("STEP_{index}"),
                reward: 1.0,
                fuel_cost: 0.5,
            }],
            newly_seen: vec![],
            bandits_found: vec![],
        }
    }

    fn pacing(ms: u64) -> PacingConfig {
        PacingConfig {
            interval: Duration::from_millis(ms),
            min_move: Duration::from_millis(50),
        }
    }

    #[test]
    fn pacing_reads_millisecond_table_with_defaults() {
        let pacing: PacingConfig =
            serde_json::from_str(r#"{"pacing_ms": 500, "min_move_ms": 80}"#).unwrap();
        assert_eq!(pacing.interval, Duration::from_millis(500));
        assert_eq!(pacing.min_move, Duration::from_millis(80));

        let pacing: PacingConfig = serde_json::from_str(r#"{"pacing_ms": 120}"#).unwrap();
        assert_eq!(pacing.interval, Duration::from_millis(120));
        assert_eq!(pacing.min_move, PacingConfig::default().min_move);

        assert!(serde_json::from_str::<PacingConfig>(r#"{"pacing_ms": -1}"#).is_err());
    }

    #[test]
    fn move_duration_has_a_floor() {
        assert_eq!(pacing(300).move_duration(), Duration::from_millis(210));
        assert_eq!(pacing(10).move_duration(), Duration::from_millis(50));
        assert_eq!(pacing(0).move_duration(), Duration::from_millis(50));
    }

    #[test]
    fn applies_one_step_per_interval_in_fifo_order() {
        let mut world = world();
        let mut playback = Playback::new(pacing(100));
        for i in 1..=3 {
            playback.enqueue(step(i, i as usize % 3, 0));
        }

        let start = Instant::now();
        let Tick::Advanced(first) = playback.tick(start, &mut world) else {
            panic!("first tick should advance");
        };
        assert_eq!(first.step_index, 1);

        assert!(matches!(
            playback.tick(start + Duration::from_millis(40), &mut world),
            Tick::Waiting { remaining } if remaining == Duration::from_millis(60)
        ));
        assert_eq!(world.stats().step_index, 1);

        let mut applied = vec![];
        let mut now = start;
        for _ in 0..2 {
            now += Duration::from_millis(100);
            if let Tick::Advanced(report) = playback.tick(now, &mut world) {
                applied.push(report.step_index);
            }
        }
        assert_eq!(applied, vec![2, 3]);
        assert_eq!(playback.tick(now + Duration::from_secs(1), &mut world), Tick::Idle);
    }

    #[test]
    fn idle_scheduler_applies_new_step_without_delay() {
        let mut world = world();
        let mut playback = Playback::new(pacing(100));
        let start = Instant::now();
        playback.enqueue(step(1, 1, 0));
        assert!(matches!(playback.tick(start, &mut world), Tick::Advanced(_)));
        assert_eq!(playback.tick(start + Duration::from_secs(2), &mut world), Tick::Idle);

        playback.enqueue(step(2, 2, 0));
        assert!(matches!(
            playback.tick(start + Duration::from_secs(3), &mut world),
            Tick::Advanced(_)
        ));
    }

    #[test]
    fn done_bypasses_queue_and_steps_still_drain() {
        let mut world = world();
        let mut playback = Playback::new(pacing(100));
        let step_text = serde_json::to_string(&StreamMessage::Step(step(1, 1, 0))).unwrap();
        let done_text = r#"{"type": "done", "summary": {"reward": 9.0, "coverage": 0.5, "bandits": 0, "fuel_consumed": 0, "fuel_efficiency": 3.0, "unique_blocks": 4}}"#;

        assert_eq!(
            playback.route_raw(&step_text, &mut world).unwrap(),
            Routed::Queued { step_index: 1 }
        );
        assert_eq!(
            playback.route_raw(done_text, &mut world).unwrap(),
            Routed::Finished { published: true }
        );
        let summary = world.stats().summary().unwrap();
        assert_eq!(summary.fuel_efficiency, 0.0);
        assert_eq!(summary.reward, 9.0);
        assert_eq!(playback.queue_len(), 1);

        assert!(matches!(playback.tick(Instant::now(), &mut world), Tick::Advanced(_)));
        assert_eq!(world.agent(0).unwrap().position, Position::new(1, 0));
        assert_eq!(world.stats().display().reward, 9.0);
    }

    #[test]
    fn malformed_and_init_messages_leave_state_untouched() {
        let mut world = world();
        let mut playback = Playback::new(pacing(100));
        assert!(playback.route_raw("{not json", &mut world).is_err());
        assert!(playback.route_raw(r#"{"type": "step"}"#, &mut world).is_err());
        assert_eq!(
            playback.route_raw(r#"{"type": "init", "grid_size": [3, 3]}"#, &mut world).unwrap(),
            Routed::Ignored
        );
        assert_eq!(playback.queue_len(), 0);
        assert_eq!(world.stats().steps_applied, 0);
    }

    #[test]
    fn replaying_steps_is_deterministic() {
        let script: Vec<StepMessage> = vec![
            step(1, 1, 0),
            StepMessage {
                bandits_found: vec![Position::new(2, 2)],
                newly_seen: vec![Position::new(0, 2)],
                ..step(2, 1, 1)
            },
            step(3, 2, 1),
            step(3, 2, 1),
        ];

        let run = || {
            let mut world = world();
            let mut playback = Playback::new(pacing(0));
            for s in &script {
                playback.enqueue(s.clone());
            }
            let now = Instant::now();
            while let Tick::Advanced(_) = playback.tick(now, &mut world) {}
            let marks: Vec<CellMark> = world
                .overlay()
                .marks()
                .enumerate()
                .map(|(_, m)| *m)
                .collect();
            (world.stats().display(), marks)
        };

        let (first_stats, first_marks) = run();
        let (second_stats, second_marks) = run();
        assert_eq!(first_stats, second_stats);
        assert_eq!(first_marks, second_marks);
        assert_eq!(first_stats.reward, 4.0);
        assert_eq!(first_marks[8], CellMark::VisitedThreat);
    }

    #[test]
    fn reset_discards_pending_steps() {
        let mut world = world();
        let mut playback = Playback::new(pacing(100));
        playback.enqueue(step(1, 1, 0));
        playback.reset();
        assert_eq!(playback.tick(Instant::now(), &mut world), Tick::Idle);
    }
}
