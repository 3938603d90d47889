use std::time::Instant;

use drone_world_core::{
    Position,
    overlay::CellMark,
    world::{AgentState, TerrainKind, World},
};
use ratatui::{prelude::*, widgets::*};

/// Session facts shown in the status bar.
pub struct StatusLine {
    pub episode: String,
    pub link: String,
    pub queued: usize,
    pub dropped: u64,
}

const AGENT_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Magenta,
    Color::Yellow,
    Color::LightBlue,
    Color::LightMagenta,
    Color::White,
];

/// Renders the user interface.
pub fn draw(frame: &mut Frame, world: &World, status: &StatusLine, now: Instant) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(65),
            Constraint::Percentage(25),
            Constraint::Length(3),
        ])
        .split(frame.area());
    let lower = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(main_layout[1]);

    render_map(frame, main_layout[0], world, now);
    render_agents(frame, lower[0], world);
    render_episode(frame, lower[1], world);
    render_status(frame, main_layout[2], status);
}

/// Cell currently occupied on screen by a drone, following its motion.
fn screen_cell(agent: &AgentState, now: Instant) -> Position {
    let (x, y) = agent.render_position(now);
    Position::new(x.round().max(0.0) as usize, y.round().max(0.0) as usize)
}

fn agent_style(agent: &AgentState) -> Style {
    let color = AGENT_COLORS[agent.id as usize % AGENT_COLORS.len()];
    Style::default().fg(color).bold()
}

fn render_map(frame: &mut Frame, area: Rect, world: &World, now: Instant) {
    let terrain = world.terrain();
    let overlay = world.overlay();
    let drones: Vec<(Position, &AgentState)> = world
        .agents()
        .values()
        .map(|agent| (screen_cell(agent, now), agent))
        .collect();

    let mut lines: Vec<Line> = Vec::with_capacity(terrain.height());
    for y in 0..terrain.height() {
        let mut spans: Vec<Span> = Vec::with_capacity(terrain.width());
        for x in 0..terrain.width() {
            let pos = Position::new(x, y);
            if let Some((_, agent)) = drones.iter().find(|(cell, _)| *cell == pos) {
                spans.push(Span::styled("@", agent_style(agent)));
                continue;
            }

            let span = match (overlay.mark(pos), terrain.get(pos)) {
                (Some(CellMark::VisitedThreat), _) => {
                    Span::styled("B", Style::default().fg(Color::White).bg(Color::Red).bold())
                }
                (_, Some(TerrainKind::Obstacle)) => {
                    Span::styled("#", Style::default().fg(Color::DarkGray))
                }
                (Some(CellMark::VisitedSafe), _) => {
                    Span::styled("·", Style::default().fg(Color::Blue))
                }
                (_, Some(TerrainKind::Unknown)) => {
                    Span::styled("?", Style::default().fg(Color::DarkGray))
                }
                _ => Span::raw(" "),
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Drone World").borders(Borders::ALL))
        .alignment(Alignment::Center);
    frame.render_widget(map_paragraph, area);
}

fn render_agents(frame: &mut Frame, area: Rect, world: &World) {
    let items: Vec<ListItem> = world
        .agents()
        .values()
        .map(|agent| {
            let line = Line::from(vec![
                Span::styled(format!("Drone {:<3}", agent.id), agent_style(agent)),
                Span::raw(format!(
                    " pos ({}, {})  action {:<8}  reward {:>7.2}  fuel {:>7.2}",
                    agent.position.x,
                    agent.position.y,
                    agent.last_action.as_deref().unwrap_or("-"),
                    agent.last_reward,
                    agent.fuel_consumed,
                )),
            ]);
            ListItem::from(line)
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Drones"));
    frame.render_widget(list, area);
}

fn render_episode(frame: &mut Frame, area: Rect, world: &World) {
    let stats = world.stats();
    let shown = stats.display();
    let (title, title_style) = if stats.is_finished() {
        ("Episode complete", Style::default().fg(Color::Green).bold())
    } else {
        ("Episode", Style::default())
    };

    let rows = vec![
        Line::from(format!("Step         {}", stats.step_index)),
        Line::from(format!("Coverage     {:.1}%", shown.coverage * 100.0)),
        Line::from(format!("Reward       {:.2}", shown.reward)),
        Line::from(format!("Fuel         {:.2}", shown.fuel_consumed)),
        Line::from(format!("Efficiency   {:.3}", shown.fuel_efficiency)),
        Line::from(format!("Unique cells {}", shown.unique_blocks)),
        Line::from(Span::styled(
            format!("Bandits      {}", shown.bandits),
            Style::default().fg(Color::Red),
        )),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, title_style));
    frame.render_widget(Paragraph::new(rows).block(block), area);
}

fn render_status(frame: &mut Frame, area: Rect, status: &StatusLine) {
    let text = format!(
        "episode {} | stream {} | queued {} | dropped {} | 'q' or 'Esc' to quit",
        status.episode, status.link, status.queued, status.dropped
    );
    let help_text = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, area);
}
