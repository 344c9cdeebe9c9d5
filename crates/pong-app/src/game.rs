// SPDX-License-Identifier: CEPL-1.0
use pong_render::GameSnapshot;

const PADDLE_STEP: f32 = 0.05;
const PADDLE_LIMIT: f32 = 0.8;
/// Within this distance the opponent snaps onto the ball unclamped.
const TRACK_BAND: f32 = 0.05;
/// Ball x at which it reaches a paddle's face.
const PADDLE_FACE: f32 = 0.86;
/// Vertical distance from a paddle's centre that still counts as a hit.
const PADDLE_REACH: f32 = 0.2;
const SERVE: [f32; 2] = [0.01, 0.005];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Up,
    Down,
}

/// Pong state advanced one fixed step per tick. The player holds the left
/// paddle, the opponent the right one.
#[derive(Clone, Debug, PartialEq)]
pub struct Game {
    player: f32,
    opponent: f32,
    ball: [f32; 2],
    velocity: [f32; 2],
}

impl Default for Game {
    fn default() -> Self {
        Self {
            player: 0.0,
            opponent: 0.0,
            ball: [0.0, 0.0],
            velocity: SERVE,
        }
    }
}

impl Game {
    pub fn apply(&mut self, action: Action) {
        let step = match action {
            Action::Up => PADDLE_STEP,
            Action::Down => -PADDLE_STEP,
        };
        self.player = (self.player + step).clamp(-PADDLE_LIMIT, PADDLE_LIMIT);
    }

    pub fn tick(&mut self) {
        let [x, y] = self.ball;
        self.opponent = if (self.opponent - y).abs() > TRACK_BAND {
            y.clamp(-PADDLE_LIMIT, PADDLE_LIMIT)
        } else {
            y
        };

        let next = [x + self.velocity[0], y + self.velocity[1]];
        let defender = if next[0] <= -PADDLE_FACE {
            Some(self.player)
        } else if next[0] >= PADDLE_FACE {
            Some(self.opponent)
        } else {
            None
        };
        if let Some(paddle) = defender {
            if (paddle - y).abs() >= PADDLE_REACH {
                self.ball = [0.0, 0.0];
                return;
            }
            self.velocity = [-self.velocity[0], -self.velocity[1]];
        }

        if next[1] <= -1.0 || next[1] >= 1.0 {
            self.velocity[1] = -self.velocity[1];
        } else {
            self.ball = next;
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            player: self.player,
            opponent: self.opponent,
            ball: self.ball,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_moves_in_steps_and_stops_at_the_limit() {
        let mut game = Game::default();
        game.apply(Action::Up);
        assert!((game.snapshot().player - 0.05).abs() < 1e-6);
        for _ in 0..40 {
            game.apply(Action::Up);
        }
        assert_eq!(game.snapshot().player, 0.8);
        for _ in 0..80 {
            game.apply(Action::Down);
        }
        assert_eq!(game.snapshot().player, -0.8);
    }

    #[test]
    fn ball_moves_by_its_velocity() {
        let mut game = Game::default();
        game.tick();
        assert_eq!(game.snapshot().ball, SERVE);
    }

    #[test]
    fn top_wall_flips_vertical_direction() {
        let mut game = Game {
            ball: [0.0, 0.998],
            velocity: [0.01, 0.005],
            ..Game::default()
        };
        game.tick();
        assert_eq!(game.snapshot().ball, [0.0, 0.998]);
        game.tick();
        let [x, y] = game.snapshot().ball;
        assert!((x - 0.01).abs() < 1e-6);
        assert!(y < 0.998);
    }

    #[test]
    fn opponent_tracks_ball_within_limits() {
        let mut game = Game {
            ball: [0.0, 0.95],
            velocity: [0.01, -0.01],
            ..Game::default()
        };
        game.tick();
        assert_eq!(game.snapshot().opponent, 0.8);
    }

    #[test]
    fn opponent_follows_ball_unclamped_when_already_close() {
        let mut game = Game {
            opponent: 0.8,
            ball: [0.0, 0.83],
            velocity: [0.01, -0.01],
            ..Game::default()
        };
        game.tick();
        assert_eq!(game.snapshot().opponent, 0.83);
    }

    #[test]
    fn miss_resets_ball_to_centre() {
        let mut game = Game {
            player: 0.8,
            ball: [-0.855, -0.5],
            velocity: [-0.01, 0.0],
            ..Game::default()
        };
        game.tick();
        assert_eq!(game.snapshot().ball, [0.0, 0.0]);
    }

    #[test]
    fn paddle_hit_reverses_ball() {
        let mut game = Game {
            player: 0.1,
            ball: [-0.855, 0.0],
            velocity: [-0.01, 0.005],
            ..Game::default()
        };
        game.tick();
        assert_eq!(game.velocity, [0.01, -0.005]);
        assert_ne!(game.snapshot().ball, [0.0, 0.0]);
    }
}
