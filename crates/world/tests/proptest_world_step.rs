//! Property tests for the world tick: arbitrary input sequences never push a
//! player out of the arena or into a solid.

use glam::Vec2;
use proptest::prelude::*;
use relaysync_core::PeerId;
use relaysync_net::{InputState, MovementParams};
use relaysync_testkit::{standing_y, test_physics, test_world};

fn inputs() -> impl Strategy<Value = Vec<(f32, bool)>> {
    prop::collection::vec((-1.0f32..=1.0, any::<bool>()), 1..120)
}

proptest! {
    #[test]
    fn players_stay_inside_and_clear(start_x in 0.0f32..380.0, frames in inputs()) {
        let mut world = test_world();
        let config = test_physics();
        let id = world.spawn_player(
            PeerId(1),
            "prop",
            Vec2::new(start_x, standing_y()),
            MovementParams::default(),
            8,
        );

        for (sequence, (move_x, jump)) in frames.into_iter().enumerate() {
            let player = world.player_mut(id).unwrap();
            player.apply_input(InputState { sequence: sequence as u32, move_x, jump });
            world.step_physics(&config, 1.0 / 60.0);

            let player = world.player(id).unwrap();
            let rect = player.hitbox().at(player.position());
            prop_assert!(world.bounds().contains_rect(&rect), "left bounds: {:?}", rect);
            prop_assert!(
                world.collidable().iter().all(|solid| !solid.overlaps(&rect)),
                "inside a solid: {:?}",
                rect
            );
        }
    }
}
