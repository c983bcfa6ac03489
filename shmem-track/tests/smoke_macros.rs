// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Ensure that all version of each macro can be used

use std::sync::Arc;

use shmem_track::entity::{Entity, toplevel};
use shmem_track::{
    Tag, create, create_tag, debug, destroy, enter, error, exit, info, set_time, test_helpers,
    test_init, trace, warn,
};

macro_rules! build_with_entity {
    ($name:ident, $macro:ident, $slvl:expr) => (
        #[test]
        fn $name() {
            let (test_tracker, tracker) = test_init!(100);

            let top = toplevel(&tracker, "top");
            test_helpers::check_and_clear(&test_tracker, &["0: created 100, top, 0 bits"]);
            assert_eq!(top.tag, Tag(100));

            $macro!(top ; "Loc with no args");
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl, ": Loc with no args")]);

            $macro!(top ; "Loc with {} argument", 1);
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl, ": Loc with 1 argument")]);

            $macro!(top ; "Loc with {}, {} arguments", 1, 1 + 1);
            test_helpers::check_and_clear(&test_tracker, &[concat!("100:", $slvl,": Loc with 1, 2 arguments")]);

            drop(top);
            test_helpers::check_and_clear(&test_tracker, &["0: destroyed 100"]);
        }
    );
}

build_with_entity!(trace_with_entity, trace, "TRACE");
build_with_entity!(info_with_entity, info, "INFO");
build_with_entity!(debug_with_entity, debug, "DEBUG");
build_with_entity!(warn_with_entity, warn, "WARN");
build_with_entity!(error_with_entity, error, "ERROR");

#[test]
fn children_are_named_and_destroyed() {
    let (test_tracker, tracker) = test_init!(10);

    let top = toplevel(&tracker, "top");
    let tile = Arc::new(Entity::new(&top, "tile0"));
    test_helpers::check_and_clear(
        &test_tracker,
        &["0: created 10, top, 0 bits", "10: created 11, top::tile0, 0 bits"],
    );

    drop(tile);
    test_helpers::check_and_clear(&test_tracker, &["10: destroyed 11"]);
}

#[test]
fn message_lifetime() {
    let (test_tracker, tracker) = test_init!(40);

    let top = toplevel(&tracker, "top");
    let msg = create_tag!(top);
    create!(top ; msg, 72, "SH_REQ");
    exit!(top ; msg);
    enter!(top ; msg);
    destroy!(top ; msg);
    test_helpers::check_and_clear(
        &test_tracker,
        &[
            "0: created 40, top, 0 bits",
            "40: created 41, SH_REQ, 72 bits",
            "40: 41 exited",
            "40: 41 entered",
            "40: destroyed 41",
        ],
    );
}

#[test]
fn time_is_in_cycles() {
    let (test_tracker, tracker) = test_init!(321);

    let top = toplevel(&tracker, "top");
    test_helpers::check_and_clear(&test_tracker, &["0: created 321, top, 0 bits"]);

    set_time!(top ; 10);
    test_helpers::check_and_clear(&test_tracker, &["321: set time 10"]);
}
