use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    EntityId, Position,
    map::{Grid, GridError},
    overlay::{MarkerChange, Overlay},
    protocol::{InitPayload, StepMessage, SummaryPayload},
    stats::{EpisodeStats, EpisodeSummary},
};

/// Chebyshev radius of the area each drone observes around its position.
pub const SENSOR_RADIUS: usize = 1;

/// Static terrain classification reported by the initialization query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerrainKind {
    Empty,
    Obstacle,
    #[default]
    Unknown,
}

impl TerrainKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => TerrainKind::Empty,
            1 => TerrainKind::Obstacle,
            _ => TerrainKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("Drone id {0} is listed more than once")]
    DuplicateAgent(EntityId),
    #[error("Drone {id} starts outside the grid at ({}, {})", .pos.x, .pos.y)]
    AgentOutOfBounds { id: EntityId, pos: Position },
}

/// A smooth move toward a cell over a fixed duration.
///
/// `from` is where the drone was drawn when the move began, which lies
/// between cells if the previous move had not finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub from: (f64, f64),
    pub to: Position,
    pub started: Instant,
    pub duration: Duration,
}

impl Motion {
    /// Fraction of the move completed at `now`, in `[0, 1]`.
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }

    /// Linearly interpolated `(x, y)` at `now`.
    pub fn sample(&self, now: Instant) -> (f64, f64) {
        let t = self.progress(now);
        let lerp = |a: f64, b: usize| a + (b as f64 - a) * t;
        (lerp(self.from.0, self.to.x), lerp(self.from.1, self.to.y))
    }
}

/// Holds the last reported state of a drone.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    pub id: EntityId,
    pub position: Position,
    pub last_action: Option<String>,
    pub last_reward: f64,
    pub fuel_consumed: f64,
    pub motion: Option<Motion>,
}

impl AgentState {
    fn new(id: EntityId, position: Position) -> Self {
        AgentState {
            id,
            position,
            last_action: None,
            last_reward: 0.0,
            fuel_consumed: 0.0,
            motion: None,
        }
    }

    /// Position to draw at `now`, following the active motion if there is one.
    pub fn render_position(&self, now: Instant) -> (f64, f64) {
        match &self.motion {
            Some(motion) => motion.sample(now),
            None => (self.position.x as f64, self.position.y as f64),
        }
    }
}

/// Result of applying one step, handed to the view for a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step_index: u64,
    pub stats: EpisodeSummary,
    pub marker_changes: Vec<(Position, MarkerChange)>,
    pub unknown_agents: Vec<EntityId>,
}

/// The viewer's complete picture of an episode.
#[derive(Debug, Clone)]
pub struct World {
    terrain: Grid<TerrainKind>,
    overlay: Overlay,
    agents: BTreeMap<EntityId, AgentState>,
    stats: EpisodeStats,
}

impl World {
    /// Creates an empty world of the given size with unknown terrain and no drones.
    pub fn new(width: usize, height: usize) -> Result<Self, WorldError> {
        Ok(World {
            terrain: Grid::new(width, height)?,
            overlay: Overlay::new(width, height)?,
            agents: BTreeMap::new(),
            stats: EpisodeStats::new(),
        })
    }

    /// Builds a world from the initialization query response.
    pub fn from_init(init: &InitPayload) -> Result<Self, WorldError> {
        let [width, height] = init.grid_size;
        let mut world = World::new(width, height)?;
        world.terrain = Grid::from_fn(width, height, |pos| {
            init.terrain
                .get(pos.y)
                .and_then(|row| row.get(pos.x))
                .map_or(TerrainKind::Unknown, |code| TerrainKind::from_code(*code))
        })?;

        for drone in &init.drones {
            world.add_agent(drone.id, drone.pos)?;
        }
        for pos in &init.seen {
            world.overlay.observe(*pos);
        }
        for pos in &init.bandits {
            world.overlay.mark_threat(*pos);
        }
        world.sync_stats();

        debug!(
            width,
            height,
            drones = world.agents.len(),
            "World initialized"
        );
        Ok(world)
    }

    /// Adds a drone at its starting position.
    pub fn add_agent(&mut self, id: EntityId, position: Position) -> Result<(), WorldError> {
        if !self.terrain.contains(position) {
            return Err(WorldError::AgentOutOfBounds { id, pos: position });
        }
        if self.agents.contains_key(&id) {
            return Err(WorldError::DuplicateAgent(id));
        }
        self.agents.insert(id, AgentState::new(id, position));
        Ok(())
    }

    /// Applies one step message as a single update.
    ///
    /// Entries for unknown drones still count toward the step totals but
    /// otherwise leave the world untouched.
    pub fn apply_step(
        &mut self,
        step: &StepMessage,
        now: Instant,
        move_duration: Duration,
    ) -> StepReport {
        let mut marker_changes = Vec::new();
        let mut unknown_agents = Vec::new();

        for update in &step.drones {
            let Some(agent) = self.agents.get_mut(&update.id) else {
                debug!(
                    drone = update.id,
                    step = step.step_index,
                    "Step references unknown drone"
                );
                unknown_agents.push(update.id);
                continue;
            };
            agent.motion = Some(Motion {
                from: agent.render_position(now),
                to: update.pos,
                started: now,
                duration: move_duration,
            });
            agent.position = update.pos;
            agent.last_action = Some(update.action.clone());
            agent.last_reward = update.reward;
            agent.fuel_consumed += update.fuel_cost;

            for pos in self.terrain.neighborhood(update.pos, SENSOR_RADIUS) {
                if let Some(change) = self.overlay.observe(pos) {
                    marker_changes.push((pos, change));
                }
            }
        }

        for pos in &step.newly_seen {
            if let Some(change) = self.overlay.observe(*pos) {
                marker_changes.push((*pos, change));
            }
        }
        for pos in &step.bandits_found {
            if let Some(change) = self.overlay.mark_threat(*pos) {
                marker_changes.push((*pos, change));
            }
        }

        self.stats.record_step(
            step.step_index,
            step.coverage,
            step.total_reward(),
            step.total_fuel_cost(),
        );
        self.sync_stats();

        trace!(
            step = step.step_index,
            changes = marker_changes.len(),
            "Applied step"
        );

        StepReport {
            step_index: step.step_index,
            stats: self.stats.display(),
            marker_changes,
            unknown_agents,
        }
    }

    /// Publishes the server's end-of-episode summary.
    pub fn finalize(&mut self, summary: &SummaryPayload) -> bool {
        self.stats.finalize(summary)
    }

    /// Drops all drones and clears the overlay and statistics, keeping the terrain.
    pub fn teardown(&mut self) {
        self.agents.clear();
        self.overlay.clear();
        self.stats.reset();
    }

    fn sync_stats(&mut self) {
        self.stats
            .sync_overlay(self.overlay.visited_count(), self.overlay.threat_count());
    }

    pub fn terrain(&self) -> &Grid<TerrainKind> {
        &self.terrain
    }
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }
    pub fn agents(&self) -> &BTreeMap<EntityId, AgentState> {
        &self.agents
    }
    pub fn agent(&self, id: EntityId) -> Option<&AgentState> {
        self.agents.get(&id)
    }
    pub fn stats(&self) -> &EpisodeStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        overlay::CellMark,
        protocol::{DroneStart, DroneUpdate},
    };

    fn three_by_three() -> World {
        World::from_init(&InitPayload {
            grid_size: [3, 3],
            terrain: vec![vec![0, 0, 0], vec![0, 1, 0], vec![0, 0, 7]],
            drones: vec![DroneStart {
                id: 0,
                pos: Position::new(0, 0),
            }],
            seen: vec![],
            bandits: vec![],
        })
        .unwrap()
    }

    fn step(index: u64, pos: Position, bandits: Vec<Position>) -> StepMessage {
        StepMessage {
            step_index: index,
            coverage: 0.2,
            drones: vec![DroneUpdate {
                id: 0,
                pos,
                action: "MOVE_E".to_string(),
                reward: 1.0,
                fuel_cost: 0.5,
            }],
            newly_seen: vec![],
            bandits_found: bandits,
        }
    }

    #[test]
    fn init_classifies_terrain_and_places_drones() {
        let world = three_by_three();
        assert_eq!(world.terrain()[Position::new(1, 1)], TerrainKind::Obstacle);
        assert_eq!(world.terrain()[Position::new(2, 2)], TerrainKind::Unknown);
        assert_eq!(world.terrain()[Position::new(0, 2)], TerrainKind::Empty);
        assert_eq!(world.agent(0).unwrap().position, Position::new(0, 0));
    }

    #[test]
    fn init_applies_preexisting_marks() {
        let world = World::from_init(&InitPayload {
            grid_size: [2, 2],
            terrain: vec![],
            drones: vec![],
            seen: vec![Position::new(0, 0), Position::new(1, 1)],
            bandits: vec![Position::new(1, 1)],
        })
        .unwrap();
        assert_eq!(
            world.overlay().mark(Position::new(0, 0)),
            Some(CellMark::VisitedSafe)
        );
        assert_eq!(
            world.overlay().mark(Position::new(1, 1)),
            Some(CellMark::VisitedThreat)
        );
        assert_eq!(world.stats().distinct_cells, 2);
        assert_eq!(world.terrain()[Position::new(0, 0)], TerrainKind::Unknown);
    }

    #[test]
    fn init_rejects_duplicate_and_misplaced_drones() {
        let mut init = InitPayload {
            grid_size: [2, 2],
            terrain: vec![],
            drones: vec![
                DroneStart {
                    id: 1,
                    pos: Position::new(0, 0),
                },
                DroneStart {
                    id: 1,
                    pos: Position::new(1, 0),
                },
            ],
            seen: vec![],
            bandits: vec![],
        };
        assert_eq!(
            World::from_init(&init).unwrap_err(),
            WorldError::DuplicateAgent(1)
        );

        init.drones = vec![DroneStart {
            id: 4,
            pos: Position::new(2, 0),
        }];
        assert!(matches!(
            World::from_init(&init),
            Err(WorldError::AgentOutOfBounds { id: 4, .. })
        ));
    }

    #[test]
    fn single_step_moves_drone_and_marks_neighbourhood() {
        let mut world = three_by_three();
        let now = Instant::now();
        let report = world.apply_step(
            &step(1, Position::new(1, 0), vec![]),
            now,
            Duration::from_millis(210),
        );

        let agent = world.agent(0).unwrap();
        assert_eq!(agent.position, Position::new(1, 0));
        assert_eq!(agent.last_action.as_deref(), Some("MOVE_E"));
        assert_eq!(agent.fuel_consumed, 0.5);
        assert_eq!(world.stats().total_reward, 1.0);
        assert_eq!(world.stats().total_fuel, 0.5);
        assert_eq!(world.stats().coverage, 0.2);

        for y in 0..3 {
            for x in 0..3 {
                let expected = if y <= 1 {
                    CellMark::VisitedSafe
                } else {
                    CellMark::Unvisited
                };
                assert_eq!(
                    world.overlay().mark(Position::new(x, y)),
                    Some(expected),
                    "({x}, {y})"
                );
            }
        }
        assert_eq!(report.marker_changes.len(), 6);
        assert_eq!(report.stats.unique_blocks, 6);
    }

    #[test]
    fn threat_survives_later_safe_pass() {
        let mut world = three_by_three();
        let now = Instant::now();
        let bandit = Position::new(2, 2);
        world.apply_step(
            &step(1, Position::new(1, 1), vec![bandit]),
            now,
            Duration::ZERO,
        );
        assert_eq!(world.overlay().mark(bandit), Some(CellMark::VisitedThreat));

        let report = world.apply_step(
            &step(2, Position::new(2, 1), vec![]),
            now,
            Duration::ZERO,
        );
        assert_eq!(world.overlay().mark(bandit), Some(CellMark::VisitedThreat));
        assert!(report.marker_changes.iter().all(|(pos, _)| *pos != bandit));
        assert_eq!(world.stats().threats, 1);
    }

    #[test]
    fn unknown_drone_is_a_no_op_for_agents() {
        let mut world = three_by_three();
        let mut message = step(1, Position::new(2, 2), vec![]);
        message.drones[0].id = 9;
        let report = world.apply_step(&message, Instant::now(), Duration::ZERO);

        assert_eq!(report.unknown_agents, vec![9]);
        assert_eq!(world.agent(0).unwrap().position, Position::new(0, 0));
        assert_eq!(world.overlay().visited_count(), 0);
        assert_eq!(world.stats().total_reward, 1.0);
    }

    #[test]
    fn motion_interpolates_toward_target() {
        let mut world = three_by_three();
        let start = Instant::now();
        let duration = Duration::from_millis(200);
        world.apply_step(&step(1, Position::new(2, 0), vec![]), start, duration);

        let agent = world.agent(0).unwrap();
        assert_eq!(agent.render_position(start), (0.0, 0.0));
        assert_eq!(
            agent.render_position(start + Duration::from_millis(100)),
            (1.0, 0.0)
        );
        assert_eq!(
            agent.render_position(start + Duration::from_secs(5)),
            (2.0, 0.0)
        );
    }

    #[test]
    fn new_move_starts_where_the_drone_is_drawn() {
        let mut world = three_by_three();
        let start = Instant::now();
        let duration = Duration::from_millis(200);
        world.apply_step(&step(1, Position::new(2, 0), vec![]), start, duration);

        let midway = start + Duration::from_millis(100);
        world.apply_step(&step(2, Position::new(2, 2), vec![]), midway, duration);

        let agent = world.agent(0).unwrap();
        assert_eq!(agent.motion.unwrap().from, (1.0, 0.0));
        assert_eq!(agent.render_position(midway), (1.0, 0.0));
        assert_eq!(
            agent.render_position(midway + Duration::from_millis(100)),
            (1.5, 1.0)
        );
        assert_eq!(agent.render_position(midway + duration), (2.0, 2.0));
    }

    #[test]
    fn teardown_clears_episode_state() {
        let mut world = three_by_three();
        world.apply_step(
            &step(1, Position::new(1, 0), vec![]),
            Instant::now(),
            Duration::ZERO,
        );
        world.teardown();
        assert!(world.agents().is_empty());
        assert_eq!(world.overlay().visited_count(), 0);
        assert_eq!(world.stats().steps_applied, 0);
        assert_eq!(world.terrain()[Position::new(1, 1)], TerrainKind::Obstacle);
    }
}
