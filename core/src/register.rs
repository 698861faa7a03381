use chrono::Utc;
use deespec_protocol::PbiId;
use deespec_protocol::Sbi;
use deespec_protocol::SbiId;
use deespec_state::StateStore;
use tracing::info;

use crate::workspace::Workspace;

/// One file-to-become-SBI supplied by the registration caller.
#[derive(Debug, Clone)]
pub struct RegisterSpec {
    pub title: String,
    pub body: String,
    pub source_path: Option<String>,
    pub priority: i64,
    pub estimated_hours: Option<f64>,
    pub labels: Vec<String>,
}

/// Register an ordered list of SBIs under `parent_pbi`.
///
/// Each SBI receives the next monotonically increasing sequence number, and
/// each one after the first gets a dependency edge on its predecessor — a
/// linear chain, so cycles are structurally impossible and pick-time cycle
/// detection is unnecessary. Row writes share one transaction; the spec body
/// lands in `specs/sbi/<id>/spec.md` afterwards.
pub async fn register_sbis(
    store: &StateStore,
    workspace: &Workspace,
    parent_pbi: Option<PbiId>,
    specs: Vec<RegisterSpec>,
) -> anyhow::Result<Vec<Sbi>> {
    let now = Utc::now();
    let registered = store
        .in_transaction(async |conn| {
            let mut registered: Vec<Sbi> = Vec::with_capacity(specs.len());
            let mut previous: Option<SbiId> = None;
            for spec in &specs {
                let sequence = deespec_state::next_sequence(conn).await?;
                let mut sbi = Sbi::new(SbiId::new(), parent_pbi.clone(), spec.title.clone(), now);
                sbi.description = spec.body.clone();
                sbi.priority = spec.priority;
                sbi.sequence = sequence;
                sbi.estimated_hours = spec.estimated_hours;
                sbi.labels = spec.labels.clone();
                sbi.file_paths = spec.source_path.iter().cloned().collect();
                deespec_state::save_sbi(conn, &sbi).await?;
                if let Some(prev) = previous.as_ref() {
                    deespec_state::save_dependencies(conn, &sbi.id, std::slice::from_ref(prev))
                        .await?;
                }
                if let Some(pbi) = parent_pbi.as_ref() {
                    deespec_state::attach_sbi_to_pbi(conn, pbi.as_str(), &sbi.id).await?;
                }
                previous = Some(sbi.id.clone());
                registered.push(sbi);
            }
            Ok(registered)
        })
        .await?;

    for sbi in &registered {
        let dir = workspace.spec_dir(&sbi.id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("spec.md"), sbi.description.as_bytes())?;
        info!(
            sbi_id = sbi.id.as_str(),
            sequence = sbi.sequence,
            "registered sbi"
        );
    }
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deespec_state::SbiFilter;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn spec(title: &str) -> RegisterSpec {
        RegisterSpec {
            title: title.to_string(),
            body: format!("do {title}"),
            source_path: None,
            priority: 0,
            estimated_hours: None,
            labels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn registration_builds_a_linear_chain() {
        let dir = TempDir::new().expect("temp dir");
        let workspace = Workspace::new(dir.path());
        workspace.init().expect("init");
        let store = StateStore::init(&workspace.db_path()).await.expect("store");

        let registered = register_sbis(
            &store,
            &workspace,
            Some(PbiId::from_string("pbi-1")),
            vec![spec("one"), spec("two"), spec("three")],
        )
        .await
        .expect("register");

        assert_eq!(registered.len(), 3);
        assert_eq!(registered[0].sequence, 1);
        assert_eq!(registered[1].sequence, 2);
        assert_eq!(registered[2].sequence, 3);

        assert_eq!(
            store
                .get_dependencies(&registered[0].id)
                .await
                .expect("deps"),
            Vec::new()
        );
        assert_eq!(
            store
                .get_dependencies(&registered[1].id)
                .await
                .expect("deps"),
            vec![registered[0].id.clone()]
        );
        assert_eq!(
            store
                .get_dependencies(&registered[2].id)
                .await
                .expect("deps"),
            vec![registered[1].id.clone()]
        );

        // Spec bodies land on disk.
        let body = std::fs::read_to_string(workspace.spec_dir(&registered[0].id).join("spec.md"))
            .expect("spec body");
        assert_eq!(body, "do one");
    }

    #[tokio::test]
    async fn sequences_keep_increasing_across_batches() {
        let dir = TempDir::new().expect("temp dir");
        let workspace = Workspace::new(dir.path());
        workspace.init().expect("init");
        let store = StateStore::init(&workspace.db_path()).await.expect("store");

        register_sbis(&store, &workspace, None, vec![spec("a")])
            .await
            .expect("first batch");
        let second = register_sbis(&store, &workspace, None, vec![spec("b")])
            .await
            .expect("second batch");
        assert_eq!(second[0].sequence, 2);

        let all = store.list_sbis(&SbiFilter::default()).await.expect("list");
        assert_eq!(all.len(), 2);
    }
}
