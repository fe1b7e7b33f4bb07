//! Tool boxes for the grouping and refinement loops.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::GroupSet;
use crate::embedding::{embed_query, Embedder};
use crate::models::VectorHunkEntry;
use crate::oracle::{ToolBox, ToolDefinition};
use crate::search::rank_hunks;

/// Tools for placing a single hunk. The loop is done once the hunk has
/// been added to a group.
pub struct GroupingTools<'a> {
    groups: &'a mut GroupSet,
    current: Option<VectorHunkEntry>,
    embedder: &'a dyn Embedder,
    top_k: usize,
    floor: f32,
}

impl<'a> GroupingTools<'a> {
    pub fn new(
        groups: &'a mut GroupSet,
        current: VectorHunkEntry,
        embedder: &'a dyn Embedder,
        top_k: usize,
        floor: f32,
    ) -> Self {
        Self {
            groups,
            current: Some(current),
            embedder,
            top_k,
            floor,
        }
    }

    /// The hunk, if the loop never placed it.
    pub fn into_current(self) -> Option<VectorHunkEntry> {
        self.current
    }

    fn add_to_group(&mut self, args: &Value) -> String {
        let Some(group_id) = str_arg(args, "groupId") else {
            return missing_args("addToGroup", &["groupId"]);
        };
        let Some(hunk) = self.current.take() else {
            return "No current hunk. It has already been added to a group.".to_string();
        };
        match self.groups.add(group_id, hunk) {
            Ok(()) => format!("Successfully added hunk to group {}", group_id),
            Err(hunk) => {
                self.current = Some(hunk);
                format!("Could not find group with ID {}", group_id)
            }
        }
    }

    fn create_group(&mut self, args: &Value) -> String {
        let Some(description) = str_arg(args, "description") else {
            return missing_args("createGroup", &["description"]);
        };
        let id = self.groups.create(description);
        format!("Created new group with id {}", id)
    }
}

#[async_trait]
impl ToolBox for GroupingTools<'_> {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            add_to_group_definition(),
            merge_groups_definition(),
            create_group_definition(),
            list_groups_definition(),
            search_definition(),
        ]
    }

    async fn call(&mut self, name: &str, arguments: Value) -> String {
        match name {
            "addToGroup" => self.add_to_group(&arguments),
            "mergeGroups" => merge_groups(self.groups, &arguments),
            "createGroup" => self.create_group(&arguments),
            "listGroups" => list_groups(self.groups),
            "search" => search(self.groups, self.embedder, &arguments, self.top_k, self.floor).await,
            other => format!("Unknown tool: {}", other),
        }
    }

    fn finished(&self) -> bool {
        self.current.is_none()
    }
}

/// Merge-only tools for the refinement pass.
pub struct RefinementTools<'a> {
    groups: &'a mut GroupSet,
    embedder: &'a dyn Embedder,
    top_k: usize,
    floor: f32,
    merges: usize,
}

impl<'a> RefinementTools<'a> {
    pub fn new(groups: &'a mut GroupSet, embedder: &'a dyn Embedder, top_k: usize, floor: f32) -> Self {
        Self {
            groups,
            embedder,
            top_k,
            floor,
            merges: 0,
        }
    }

    pub fn merges(&self) -> usize {
        self.merges
    }
}

#[async_trait]
impl ToolBox for RefinementTools<'_> {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            merge_groups_definition(),
            list_groups_definition(),
            search_definition(),
        ]
    }

    async fn call(&mut self, name: &str, arguments: Value) -> String {
        match name {
            "mergeGroups" => {
                let before = self.groups.len();
                let out = merge_groups(self.groups, &arguments);
                if self.groups.len() < before {
                    self.merges += 1;
                }
                out
            }
            "listGroups" => list_groups(self.groups),
            "search" => search(self.groups, self.embedder, &arguments, self.top_k, self.floor).await,
            other => format!("Unknown tool: {}", other),
        }
    }
}

fn str_arg<'v>(args: &'v Value, key: &str) -> Option<&'v str> {
    args.get(key).and_then(|v| v.as_str())
}

fn missing_args(tool: &str, keys: &[&str]) -> String {
    format!(
        "Invalid arguments for {}: expected string fields {}",
        tool,
        keys.join(", ")
    )
}

fn merge_groups(groups: &mut GroupSet, args: &Value) -> String {
    let (Some(a), Some(b), Some(description)) = (
        str_arg(args, "groupIdA"),
        str_arg(args, "groupIdB"),
        str_arg(args, "newDescription"),
    ) else {
        return missing_args("mergeGroups", &["groupIdA", "groupIdB", "newDescription"]);
    };
    match groups.merge(a, b, description) {
        Ok(id) => format!("Groups merged into a new group with ID {}", id),
        Err(message) => message,
    }
}

fn list_groups(groups: &GroupSet) -> String {
    if groups.is_empty() {
        return "No groups yet.".to_string();
    }
    groups
        .iter()
        .map(|(id, g)| format!("Group ID: {}\n Description: {}", id, g.description))
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn search(
    groups: &GroupSet,
    embedder: &dyn Embedder,
    args: &Value,
    top_k: usize,
    floor: f32,
) -> String {
    let Some(query) = str_arg(args, "query") else {
        return missing_args("search", &["query"]);
    };
    let vector = match embed_query(embedder, query).await {
        Ok(v) => v,
        Err(e) => return format!("Search failed: {}", e),
    };
    let hits = rank_hunks(&vector, groups.placed(), top_k, floor);
    serde_json::to_string(&hits).unwrap_or_else(|_| "[]".to_string())
}

fn add_to_group_definition() -> ToolDefinition {
    ToolDefinition::new(
        "addToGroup",
        "Add current hunk to group",
        json!({
            "type": "object",
            "properties": {
                "groupId": {"type": "string", "description": "ID of the group to add the hunk to"}
            },
            "required": ["groupId"]
        }),
    )
}

fn merge_groups_definition() -> ToolDefinition {
    ToolDefinition::new(
        "mergeGroups",
        "Merge two groups together",
        json!({
            "type": "object",
            "properties": {
                "groupIdA": {"type": "string"},
                "groupIdB": {"type": "string"},
                "newDescription": {"type": "string", "description": "Description of the merged group"}
            },
            "required": ["groupIdA", "groupIdB", "newDescription"]
        }),
    )
}

fn create_group_definition() -> ToolDefinition {
    ToolDefinition::new(
        "createGroup",
        "Create a new empty group of hunks with a description",
        json!({
            "type": "object",
            "properties": {
                "description": {"type": "string"}
            },
            "required": ["description"]
        }),
    )
}

fn list_groups_definition() -> ToolDefinition {
    ToolDefinition::new(
        "listGroups",
        "List the groups",
        json!({"type": "object", "properties": {}}),
    )
}

fn search_definition() -> ToolDefinition {
    ToolDefinition::new(
        "search",
        "Search all hunks that have been grouped for a given query using vector similarity",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HunkType, Operation};
    use anyhow::Result;

    struct Axis;

    #[async_trait]
    impl Embedder for Axis {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("parser") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    fn entry(hash: &str, embedding: Vec<f32>) -> VectorHunkEntry {
        VectorHunkEntry {
            hunk_type: HunkType::Text,
            file_path: format!("src/{hash}.rs"),
            previous_file_path: None,
            operation: Operation::Modified,
            content: String::new(),
            summary: format!("{hash} summary"),
            embedding,
            complete_patch: String::new(),
            lines_added: 1,
            lines_removed: 0,
            hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_add_finishes() {
        let mut groups = GroupSet::new();
        let embedder = Axis;
        let mut tools = GroupingTools::new(&mut groups, entry("a", vec![1.0, 0.0]), &embedder, 10, 0.1);

        assert_eq!(tools.call("listGroups", json!({})).await, "No groups yet.");
        let created = tools.call("createGroup", json!({"description": "parser"})).await;
        let id = created.trim_start_matches("Created new group with id ").to_string();

        let out = tools.call("addToGroup", json!({"groupId": "bogus"})).await;
        assert_eq!(out, "Could not find group with ID bogus");
        assert!(!tools.finished());

        let out = tools.call("addToGroup", json!({"groupId": id})).await;
        assert!(out.starts_with("Successfully added hunk to group"));
        assert!(tools.finished());
        assert!(tools.call("addToGroup", json!({"groupId": id})).await.starts_with("No current hunk"));
        assert!(tools.into_current().is_none());
        assert_eq!(groups.hunk_count(), 1);
    }

    #[tokio::test]
    async fn bad_arguments_are_reported() {
        let mut groups = GroupSet::new();
        let embedder = Axis;
        let mut tools = GroupingTools::new(&mut groups, entry("a", vec![1.0, 0.0]), &embedder, 10, 0.1);
        let out = tools.call("createGroup", json!({"name": "x"})).await;
        assert!(out.starts_with("Invalid arguments for createGroup"));
        assert!(tools.call("explode", json!({})).await.starts_with("Unknown tool"));
    }

    #[tokio::test]
    async fn search_returns_group_ids() {
        let mut groups = GroupSet::new();
        let parser = groups.create("parser");
        let docs = groups.create("docs");
        groups.add(&parser, entry("p", vec![1.0, 0.0])).unwrap();
        groups.add(&docs, entry("d", vec![0.0, 1.0])).unwrap();

        let embedder = Axis;
        let mut tools = RefinementTools::new(&mut groups, &embedder, 10, 0.1);
        let out = tools.call("search", json!({"query": "parser change"})).await;
        let hits: Vec<Value> = serde_json::from_str(&out).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["groupId"], parser.as_str());
        assert_eq!(hits[0]["filePath"], "src/p.rs");
    }

    #[tokio::test]
    async fn refinement_counts_merges() {
        let mut groups = GroupSet::new();
        let a = groups.create("a");
        let b = groups.create("b");
        let embedder = Axis;
        let mut tools = RefinementTools::new(&mut groups, &embedder, 10, 0.1);
        assert_eq!(tools.definitions().len(), 3);
        let out = tools
            .call("mergeGroups", json!({"groupIdA": a, "groupIdB": b, "newDescription": "ab"}))
            .await;
        assert!(out.starts_with("Groups merged into a new group with ID"));
        assert_eq!(tools.merges(), 1);
        let listing = tools.call("listGroups", json!({})).await;
        assert!(listing.contains("Description: ab"));
    }
}
