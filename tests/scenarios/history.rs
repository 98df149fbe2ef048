use mapshell::actions::{self, Edit};
use mapshell::connection::RemoteEntity;
use mapshell::graph::{Entity, EntityId, Loc};
use mapshell::history::{History, HistoryState};
use proptest::prelude::*;
use rstest::rstest;

use super::neighbourhood;

fn loaded() -> History {
    let mut history = History::new();
    history.merge(neighbourhood(), None);
    history
}

fn snapshot(history: &History) -> Vec<Entity> {
    let mut entities: Vec<Entity> = history
        .graph()
        .entities()
        .map(|entity| (**entity).clone())
        .collect();
    entities.sort_by_key(|entity| entity.id());
    entities
}

/// One of a handful of edits that always apply to `neighbourhood`.
fn edit(choice: u8, step: usize) -> Edit {
    let shift = step as f64;
    match choice % 4 {
        0 => Edit::new(actions::move_node(EntityId::node(4), Loc::new(shift, shift))),
        1 => Edit::new(actions::change_tags(
            EntityId::node(3),
            [("name".to_string(), format!("step {step}"))].into(),
        )),
        2 => Edit::new(actions::move_node(EntityId::node(1), Loc::new(-shift, 0.5))),
        _ => Edit::new(actions::noop()),
    }
    .annotate(format!("Edit {step}"))
}

proptest! {
    #[test]
    fn undo_all_then_redo_all_restores_tip(choices in prop::collection::vec(any::<u8>(), 1..12)) {
        let mut history = loaded();
        for (step, choice) in choices.iter().enumerate() {
            history.perform(edit(*choice, step)).unwrap();
        }
        let tip = snapshot(&history);
        for _ in 0..choices.len() {
            prop_assert!(history.undo().is_some());
        }
        prop_assert_eq!(history.state(), HistoryState::CleanAtBase);
        for _ in 0..choices.len() {
            prop_assert!(history.redo().is_some());
        }
        prop_assert_eq!(snapshot(&history), tip);
        prop_assert!(history.redo().is_none());
    }

    #[test]
    fn perform_after_undo_truncates_redo(edits in 2usize..8, undos in 1usize..8) {
        let undos = undos.min(edits);
        let mut history = loaded();
        for step in 0..edits {
            history.perform(edit(0, step)).unwrap();
        }
        for _ in 0..undos {
            history.undo();
        }
        history.perform(edit(1, 100)).unwrap();
        prop_assert_eq!(history.len(), edits - undos + 2);
        prop_assert!(history.redo().is_none());
    }

    #[test]
    fn replace_never_deepens_stack(edits in 0usize..6, undos in 0usize..6) {
        let undos = undos.min(edits);
        let mut history = loaded();
        for step in 0..edits {
            history.perform(edit(0, step)).unwrap();
        }
        for _ in 0..undos {
            history.undo();
        }
        let depth = history.undo_depth();
        history.replace(edit(2, 200)).unwrap();
        prop_assert!(history.undo_depth() <= depth);
    }
}

#[test]
fn test_version_follows_undo_and_redo() {
    let mut history = loaded();
    let a = EntityId::node(1);
    assert_eq!(history.graph().entity(&a).unwrap().version(), 1);

    history
        .perform(Edit::new(actions::move_node(a, Loc::new(0.5, 0.5))).annotate("Moved a point."))
        .unwrap();
    assert!(history.has_changes());
    assert_eq!(history.graph().entity(&a).unwrap().version(), 2);

    history.undo().unwrap();
    assert!(!history.has_changes());
    assert_eq!(history.graph().entity(&a).unwrap().version(), 1);

    history.redo().unwrap();
    assert_eq!(history.graph().entity(&a).unwrap().version(), 2);
}

#[test]
fn test_merge_keeps_local_modification() {
    let mut history = loaded();
    let a = EntityId::node(4);
    history
        .perform(Edit::new(actions::move_node(a, Loc::new(9.0, 9.0))).annotate("Moved a point."))
        .unwrap();

    let report = history.merge(
        vec![
            RemoteEntity::node("n4", [3.5, 0.0]).with_version(7),
            RemoteEntity::node("n5", [4.0, 0.0]),
        ],
        None,
    );
    assert_eq!(report.merged, vec![EntityId::node(5)]);
    assert_eq!(report.ignored, 1);
    assert_eq!(
        history.graph().entity(&a).unwrap().loc(),
        Some(Loc::new(9.0, 9.0))
    );
    // Earlier checkpoints see the merged entity too.
    history.undo().unwrap();
    assert!(history.graph().has_entity(&EntityId::node(5)));
}

#[test]
fn test_local_deletion_wins_over_remote() {
    let mut history = loaded();
    history
        .perform(Edit::new(actions::delete_node(EntityId::node(4))).annotate("Deleted a point."))
        .unwrap();
    history.merge(
        vec![RemoteEntity::node("n4", [8.0, 8.0]).with_version(2)],
        None,
    );
    assert!(!history.graph().has_entity(&EntityId::node(4)));
    assert!(history.has_changes());
}

#[test]
fn test_malformed_records_do_not_abort_merge() {
    let mut history = History::new();
    let report = history.merge(
        vec![
            RemoteEntity::way("w9", &["n9", "oops"]),
            RemoteEntity::node("n9", [0.0, 0.0]),
        ],
        None,
    );
    assert_eq!(report.malformed.len(), 1);
    assert_eq!(report.merged, vec![EntityId::node(9)]);
}

#[rstest]
#[case::after_reset(true)]
#[case::after_fresh_merge(false)]
fn test_no_changes_without_local_edits(#[case] reset_first: bool) {
    let mut history = loaded();
    history
        .perform(Edit::new(actions::move_node(EntityId::node(1), Loc::new(1.0, 1.0))))
        .unwrap();
    if reset_first {
        history.reset();
    } else {
        history = History::new();
    }
    history.merge(neighbourhood(), None);
    assert!(!history.has_changes());
    assert_eq!(history.state(), HistoryState::CleanAtBase);
}

#[test]
fn test_checkpoint_survives_later_merge() {
    let mut history = loaded();
    history
        .perform(Edit::new(actions::move_node(EntityId::node(2), Loc::new(5.0, 5.0))).annotate("Moved."))
        .unwrap();
    history.checkpoint("before-draw");
    history
        .perform(Edit::new(actions::delete_node(EntityId::node(3))).annotate("Deleted."))
        .unwrap();
    history.merge(vec![RemoteEntity::node("n6", [6.0, 6.0])], None);

    assert!(history.reset_to_checkpoint("before-draw"));
    assert!(history.graph().has_entity(&EntityId::node(3)));
    assert!(history.graph().has_entity(&EntityId::node(6)));
    assert_eq!(
        history.graph().entity(&EntityId::node(2)).unwrap().loc(),
        Some(Loc::new(5.0, 5.0))
    );
    assert!(!history.reset_to_checkpoint("never-set"));
}
