//! Obsidian-style note graph: nodes are notes (by canonical path), edges are
//! wikilinks/backlinks/tags. Link targets that do not resolve to a real note
//! yet are stored as placeholder nodes so no edge ever dangles.

use std::collections::{HashSet, VecDeque};

use rusqlite::{OptionalExtension, Transaction, params};
use serde::Serialize;

use crate::error::EngineResult;
use crate::types::NotePayload;

use super::Db;

#[derive(Debug, Clone, Serialize)]
pub struct GraphNeighbor {
    pub path: String,
    pub title: String,
    pub distance: usize,
}

/// Replace a note's graph entry inside an existing commit transaction.
pub fn upsert_note(tx: &Transaction, path: &str, note: &NotePayload) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO graph_nodes(path, title, placeholder) VALUES (?1, ?2, 0)
         ON CONFLICT(path) DO UPDATE SET title = excluded.title, placeholder = 0",
        params![path, note.title],
    )?;
    let node_id: i64 = tx.query_row(
        "SELECT id FROM graph_nodes WHERE path = ?1",
        params![path],
        |r| r.get(0),
    )?;

    tx.execute("DELETE FROM graph_edges WHERE source = ?1", params![node_id])?;

    for link in &note.links {
        let target_id = ensure_node(tx, link)?;
        tx.execute(
            "INSERT OR IGNORE INTO graph_edges(source, target, kind) VALUES (?1, ?2, 'wikilink')",
            params![node_id, target_id],
        )?;
    }
    for tag in &note.tags {
        let target_id = ensure_node(tx, &format!("#{tag}"))?;
        tx.execute(
            "INSERT OR IGNORE INTO graph_edges(source, target, kind) VALUES (?1, ?2, 'tag')",
            params![node_id, target_id],
        )?;
    }
    Ok(())
}

/// Remove a note's outgoing edges and demote it to a placeholder if anything
/// still links to it, otherwise delete it outright.
pub fn remove_note(tx: &Transaction, path: &str) -> rusqlite::Result<()> {
    let node_id: Option<i64> = tx
        .query_row(
            "SELECT id FROM graph_nodes WHERE path = ?1",
            params![path],
            |r| r.get(0),
        )
        .optional()?;
    let Some(node_id) = node_id else {
        return Ok(());
    };

    tx.execute("DELETE FROM graph_edges WHERE source = ?1", params![node_id])?;
    let inbound: i64 = tx.query_row(
        "SELECT COUNT(*) FROM graph_edges WHERE target = ?1",
        params![node_id],
        |r| r.get(0),
    )?;
    if inbound == 0 {
        tx.execute("DELETE FROM graph_nodes WHERE id = ?1", params![node_id])?;
    } else {
        tx.execute(
            "UPDATE graph_nodes SET placeholder = 1 WHERE id = ?1",
            params![node_id],
        )?;
    }
    Ok(())
}

fn ensure_node(tx: &Transaction, path: &str) -> rusqlite::Result<i64> {
    tx.execute(
        "INSERT OR IGNORE INTO graph_nodes(path, title, placeholder) VALUES (?1, '', 1)",
        params![path],
    )?;
    tx.query_row(
        "SELECT id FROM graph_nodes WHERE path = ?1",
        params![path],
        |r| r.get(0),
    )
}

impl Db {
    /// Breadth-first neighborhood of a note up to `max_hops`, following edges
    /// in both directions (a wikilink implies a backlink). Cycles are fine;
    /// the visited set bounds the walk and no transitive closure is held.
    pub fn graph_neighbors(&self, path: &str, max_hops: usize) -> EngineResult<Vec<GraphNeighbor>> {
        self.with_conn(|c| {
            let start: Option<i64> = c
                .query_row(
                    "SELECT id FROM graph_nodes WHERE path = ?1",
                    params![path],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(start) = start else {
                return Ok(Vec::new());
            };

            let mut out_stmt =
                c.prepare("SELECT target FROM graph_edges WHERE source = ?1")?;
            let mut in_stmt =
                c.prepare("SELECT source FROM graph_edges WHERE target = ?1")?;
            let mut node_stmt =
                c.prepare("SELECT path, title FROM graph_nodes WHERE id = ?1")?;

            let mut visited: HashSet<i64> = HashSet::from([start]);
            let mut frontier: VecDeque<(i64, usize)> = VecDeque::from([(start, 0)]);
            let mut result = Vec::new();

            while let Some((node, dist)) = frontier.pop_front() {
                if dist >= max_hops {
                    continue;
                }
                let mut next: Vec<i64> = out_stmt
                    .query_map(params![node], |r| r.get(0))?
                    .collect::<Result<_, _>>()?;
                let inbound: Vec<i64> = in_stmt
                    .query_map(params![node], |r| r.get(0))?
                    .collect::<Result<_, _>>()?;
                next.extend(inbound);

                for n in next {
                    if visited.insert(n) {
                        let (p, title): (String, String) =
                            node_stmt.query_row(params![n], |r| Ok((r.get(0)?, r.get(1)?)))?;
                        result.push(GraphNeighbor {
                            path: p,
                            title,
                            distance: dist + 1,
                        });
                        frontier.push_back((n, dist + 1));
                    }
                }
            }
            Ok(result)
        })
    }

    pub fn graph_node_count(&self) -> EngineResult<i64> {
        self.with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM graph_nodes", [], |r| r.get(0))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: &str, links: &[&str], tags: &[&str]) -> NotePayload {
        NotePayload {
            title: title.into(),
            links: links.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn placeholder_nodes_for_unresolved_links() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            upsert_note(tx, "a.md", &note("A", &["b.md"], &[])).map_err(Into::into)
        })
        .unwrap();

        // b.md does not exist as a note yet but the edge must not dangle
        let neighbors = db.graph_neighbors("a.md", 1).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].path, "b.md");
    }

    #[test]
    fn bfs_respects_hop_bound_and_cycles() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            upsert_note(tx, "a.md", &note("A", &["b.md"], &[]))?;
            upsert_note(tx, "b.md", &note("B", &["c.md"], &[]))?;
            // cycle back to a
            upsert_note(tx, "c.md", &note("C", &["a.md"], &[]))?;
            Ok(())
        })
        .unwrap();

        let one_hop = db.graph_neighbors("a.md", 1).unwrap();
        assert_eq!(one_hop.len(), 2); // b (outgoing) + c (backlink)

        let two_hops = db.graph_neighbors("a.md", 2).unwrap();
        // full graph reached, no duplicates despite the cycle
        assert_eq!(two_hops.len(), 2);
    }

    #[test]
    fn remove_note_keeps_linked_placeholder() {
        let db = Db::open_in_memory().unwrap();
        db.with_tx(|tx| {
            upsert_note(tx, "a.md", &note("A", &["b.md"], &[]))?;
            upsert_note(tx, "b.md", &note("B", &[], &[]))?;
            Ok(())
        })
        .unwrap();

        db.with_tx(|tx| remove_note(tx, "b.md").map_err(Into::into)).unwrap();
        // a still links to b, so b survives as a placeholder
        let neighbors = db.graph_neighbors("a.md", 1).unwrap();
        assert_eq!(neighbors.len(), 1);

        db.with_tx(|tx| remove_note(tx, "a.md").map_err(Into::into)).unwrap();
        assert_eq!(db.graph_neighbors("b.md", 1).unwrap().len(), 0);
    }
}
