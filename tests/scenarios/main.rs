mod coordinator;
mod history;
mod persistence;

use mapshell::VERSION;
use mapshell::connection::RemoteEntity;

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!VERSION.is_empty());
}

/// A small neighbourhood: three floors of indoor points, an untagged point
/// and a way joining the first two.
pub(crate) fn neighbourhood() -> Vec<RemoteEntity> {
    vec![
        RemoteEntity::node("n1", [0.0, 0.0])
            .with_tag("level", "0")
            .with_version(1),
        RemoteEntity::node("n2", [1.0, 0.0])
            .with_tag("level", "1")
            .with_version(1),
        RemoteEntity::node("n3", [2.0, 0.0])
            .with_tag("level", "2")
            .with_version(1),
        RemoteEntity::node("n4", [3.0, 0.0]).with_version(1),
        RemoteEntity::way("w1", &["n1", "n2"])
            .with_tag("highway", "footway")
            .with_version(3),
    ]
}
