use std::cell::RefCell;
use std::rc::Rc;

use mapshell::actions::{self, Edit};
use mapshell::connection::{StaticConnection, Viewport};
use mapshell::context::events::ContextEvent;
use mapshell::context::mode::SelectMode;
use mapshell::graph::{EntityId, Extent, Loc, LocOffset};
use mapshell::persistence::MemoryStore;
use mapshell::{Context, EditorConfig};

use super::neighbourhood;

fn viewport() -> Viewport {
    Viewport {
        extent: Extent::new(Loc::new(-5.0, -5.0), Loc::new(5.0, 5.0)),
        zoom: 17.0,
    }
}

fn loaded_context() -> Context {
    let connection = StaticConnection::new(neighbourhood());
    let mut context = Context::new(
        EditorConfig::default(),
        Box::new(MemoryStore::new()),
        Box::new(connection),
    );
    context.load_tiles(&viewport(), [800, 600], None);
    context.tick();
    context
}

#[test]
fn test_levels_come_from_tagged_entities() {
    let mut context = loaded_context();
    assert_eq!(context.available_levels(), &[0.0, 1.0, 2.0]);
    assert!(context.has_levels_defined(&EntityId::node(1)));
    assert!(!context.has_levels_defined(&EntityId::node(4)));

    context.level_up();
    assert_eq!(context.level(), 1.0);
    context.level_up();
    assert_eq!(context.level(), 2.0);
    context.level_up();
    assert_eq!(context.level(), 2.0);
}

#[test]
fn test_paste_ignores_edits_made_after_copy() {
    let mut context = loaded_context();
    context.copy_ids(vec![EntityId::way(1)]);
    for (step, id) in [1, 2, 1].into_iter().enumerate() {
        context
            .perform(
                Edit::new(actions::move_node(
                    EntityId::node(id),
                    Loc::new(10.0 + step as f64, 10.0),
                ))
                .annotate("Moved a point."),
            )
            .unwrap();
    }

    context.paste(LocOffset::new(0.5, 0.5)).unwrap().unwrap();
    let pasted = context.selected_ids();
    let way = context.entity(&pasted[0]).unwrap().clone();
    assert_eq!(way.tags().get("highway").map(String::as_str), Some("footway"));
    let locs: Vec<Loc> = context
        .child_nodes(&way)
        .unwrap()
        .iter()
        .filter_map(|node| node.loc())
        .collect();
    assert_eq!(locs, vec![Loc::new(0.5, 0.5), Loc::new(1.5, 0.5)]);
    assert!(context.copied_ids() == [EntityId::way(1)]);
}

#[test]
fn test_quota_exceeded_keeps_edit() {
    let connection = StaticConnection::new(neighbourhood());
    let mut context = Context::new(
        EditorConfig::default(),
        Box::new(MemoryStore::with_quota(16)),
        Box::new(connection),
    );
    context.load_tiles(&viewport(), [800, 600], None);
    context.tick();
    context
        .perform(
            Edit::new(actions::move_node(EntityId::node(4), Loc::new(4.0, 4.0)))
                .annotate("Moved a point."),
        )
        .unwrap();

    assert!(context.save().is_some());
    assert!(!context.has_restorable_changes());
    assert!(context.has_changes());
    assert_eq!(
        context.entity(&EntityId::node(4)).unwrap().loc(),
        Some(Loc::new(4.0, 4.0))
    );
}

#[test]
fn test_late_tile_reply_does_not_clobber_edit() {
    let connection = StaticConnection::new(neighbourhood());
    let mut context = Context::new(
        EditorConfig::default(),
        Box::new(MemoryStore::new()),
        Box::new(connection.clone()),
    );
    context.load_tiles(&viewport(), [800, 600], None);
    context.tick();

    connection.hold();
    context.load_tiles(&viewport(), [800, 600], None);
    context
        .perform(
            Edit::new(actions::move_node(EntityId::node(2), Loc::new(7.0, 7.0)))
                .annotate("Moved a point."),
        )
        .unwrap();
    assert_eq!(connection.release_reversed(), 1);
    context.tick();

    assert_eq!(
        context.entity(&EntityId::node(2)).unwrap().loc(),
        Some(Loc::new(7.0, 7.0))
    );
    assert_eq!(context.history().undo_depth(), 1);
}

#[test]
fn test_selection_listener_is_replaced_not_duplicated() {
    let connection = StaticConnection::new(neighbourhood());
    connection.hold();
    let mut context = Context::new(
        EditorConfig::default(),
        Box::new(MemoryStore::new()),
        Box::new(connection.clone()),
    );
    let entered = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&entered);
    context.on("enter.test", move |event| {
        if let ContextEvent::Enter { mode } = event {
            sink.borrow_mut().push(mode.clone());
        }
    });

    context.zoom_to_entity(EntityId::node(1), true);
    context.zoom_to_entity(EntityId::node(3), true);
    connection.release_reversed();
    context.tick();

    assert_eq!(*entered.borrow(), vec!["select".to_string()]);
    assert_eq!(context.selected_ids(), vec![EntityId::node(3)]);
}

#[test]
fn test_undo_redo_through_context_notify_and_schedule() {
    let mut context = loaded_context();
    let changes = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&changes);
    context.on("change.counter", move |_| *sink.borrow_mut() += 1);

    context
        .perform(
            Edit::new(actions::move_node(EntityId::node(1), Loc::new(0.1, 0.1)))
                .annotate("Moved a point."),
        )
        .unwrap();
    context.undo().unwrap();
    context.redo().unwrap();
    assert!(context.redo().is_none());
    assert_eq!(*changes.borrow(), 3);
    assert!(context.is_save_pending());

    context.off("change.counter");
    context.undo();
    assert_eq!(*changes.borrow(), 3);
}

#[test]
fn test_entering_select_by_hand() {
    let mut context = loaded_context();
    context.enter(Box::new(SelectMode::new(vec![EntityId::node(1), EntityId::way(1)])));
    assert_eq!(context.mode().id(), "select");
    assert_eq!(context.selected_ids().len(), 2);
}
