use mapshell::actions::{self, Edit};
use mapshell::connection::{StaticConnection, Viewport};
use mapshell::context::mode::SelectMode;
use mapshell::graph::{EntityId, EntityKind, Extent, Loc};
use mapshell::{Context, EditorConfig};
use tempfile::TempDir;

use super::neighbourhood;

fn open(dir: &TempDir) -> Context {
    let config = EditorConfig {
        instance: "survey".to_string(),
        storage_path: Some(dir.path().join("editor.redb")),
        ..EditorConfig::default()
    };
    let mut context =
        Context::from_config(config, Box::new(StaticConnection::new(neighbourhood()))).unwrap();
    let viewport = Viewport {
        extent: Extent::new(Loc::new(-5.0, -5.0), Loc::new(5.0, 5.0)),
        zoom: 18.0,
    };
    context.load_tiles(&viewport, [800, 600], None);
    context.tick();
    context
}

#[test]
fn test_edits_survive_restart() {
    let dir = TempDir::new().unwrap();
    let created;
    {
        let mut context = open(&dir);
        created = context.allocate_id(EntityKind::Node);
        context
            .perform(
                Edit::new(actions::add_entity(mapshell::Entity::node(
                    created,
                    Loc::new(2.5, 2.5),
                )))
                .then(actions::add_vertex(EntityId::way(1), created, None))
                .annotate("Extended a line."),
            )
            .unwrap();
        context
            .perform(Edit::new(actions::delete_node(EntityId::node(4))).annotate("Deleted a point."))
            .unwrap();
        context.undo().unwrap();
        assert!(context.save().is_some());
    }

    let mut context = open(&dir);
    assert!(context.has_restorable_changes());
    assert!(context.restore().unwrap());
    assert!(context.has_entity(&created));
    assert_eq!(context.entity(&EntityId::way(1)).unwrap().nodes().len(), 3);
    assert_eq!(context.history().undo_annotation(), Some("Extended a line."));
    assert_eq!(context.history().redo_annotation(), Some("Deleted a point."));

    // Restored id counters never hand out an id already in use.
    assert_ne!(context.allocate_id(EntityKind::Node), created);

    context.redo().unwrap();
    assert!(!context.has_entity(&EntityId::node(4)));
}

#[test]
fn test_clean_history_clears_saved_entry() {
    let dir = TempDir::new().unwrap();
    let mut context = open(&dir);
    context
        .perform(
            Edit::new(actions::move_node(EntityId::node(1), Loc::new(0.2, 0.2)))
                .annotate("Moved a point."),
        )
        .unwrap();
    context.save();
    assert!(context.has_restorable_changes());

    context.undo().unwrap();
    assert_eq!(context.save(), None);
    assert!(!context.has_restorable_changes());
}

#[test]
fn test_stored_level_restores_selection_on_next_session() {
    let dir = TempDir::new().unwrap();
    {
        let mut context = open(&dir);
        context.set_level(1.0);
        context.enter(Box::new(SelectMode::new(vec![EntityId::node(2)])));
        context.store_level();
    }

    let mut context = open(&dir);
    assert_eq!(context.level(), 1.0);
    context.tick();
    assert_eq!(context.selected_ids(), vec![EntityId::node(2)]);
}

#[test]
fn test_flush_discards_unsaved_work() {
    let dir = TempDir::new().unwrap();
    let mut context = open(&dir);
    context
        .perform(
            Edit::new(actions::move_node(EntityId::node(1), Loc::new(0.3, 0.3)))
                .annotate("Moved a point."),
        )
        .unwrap();
    context.flush();
    assert!(!context.has_changes());
    assert!(!context.is_save_pending());
    assert!(!context.has_restorable_changes());
}
