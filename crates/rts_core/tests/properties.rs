//! Property tests over random command streams.

use proptest::prelude::*;
use rts_core::commands::apply_command;
use rts_core::components::TilePos;
use rts_core::pathfinding::{find_path, Traversal};
use rts_core::simulation::TICK_DT;
use rts_test_utils::determinism::strategies::{arb_command, arb_command_sequence};
use rts_test_utils::fixtures::{two_teams, walled_map, BLUE, RED};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_resources_never_negative(commands in arb_command_sequence(40)) {
        let mut fixture = two_teams();
        let engine = &mut fixture.engine;

        for (i, command) in commands.iter().enumerate() {
            let team = if i % 2 == 0 { RED } else { BLUE };
            let _ = apply_command(engine, team, command);
            engine.update(TICK_DT);

            for team in [RED, BLUE] {
                let balance = engine.resources(team);
                prop_assert!(balance.minerals >= 0);
                prop_assert!(balance.wood >= 0);
            }
        }
    }

    #[test]
    fn prop_rejected_commands_are_idempotent(
        setup in arb_command_sequence(10),
        command in arb_command(),
    ) {
        let mut fixture = two_teams();
        let engine = &mut fixture.engine;
        for c in &setup {
            let _ = apply_command(engine, RED, c);
        }

        let before = engine.get_snapshot(false);
        if let Err(first) = apply_command(engine, RED, &command) {
            prop_assert_eq!(&engine.get_snapshot(false), &before);
            let second = apply_command(engine, RED, &command).unwrap_err();
            prop_assert_eq!(first, second);
            prop_assert_eq!(&engine.get_snapshot(false), &before);
        }
    }

    #[test]
    fn prop_partial_path_whenever_progress_possible(x in 0i32..20, y in 0i32..20) {
        let map = walled_map();
        let start = TilePos::new(1, 1);
        let goal = TilePos::new(x, y);
        let path = find_path(&map, start, goal, Traversal::Land);

        if goal == start {
            prop_assert!(path.is_empty());
        } else {
            prop_assert!(!path.is_empty());
            for step in &path {
                prop_assert!(map.is_walkable(*step));
            }
        }
    }

    #[test]
    fn prop_partial_path_from_wall_face(y in 13i32..=19) {
        // Starts hug the enclosure's west face; the goal is sealed inside.
        let map = walled_map();
        let start = TilePos::new(13, y);
        let path = find_path(&map, start, TilePos::new(16, 16), Traversal::Land);

        prop_assert!(!path.is_empty());
        prop_assert!(start.is_adjacent(path[0]));
        for step in &path {
            prop_assert!(map.is_walkable(*step));
        }
    }
}
