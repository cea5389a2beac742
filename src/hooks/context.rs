//! File-backed transaction context
//!
//! The context file is the only memory a dispatch process has of earlier
//! invocations for the same client. Every transition (session start, prompt,
//! file edit, turn end, session end) is a locked read / mutate / atomic write
//! of that file. The edit-accumulation window is encoded in `edited_files`:
//! `None` while idle, `Some(set)` while tracking.

use crate::hooks::git::{GitCollector, GitMetadata};
use crate::hooks::persist::{self, FileLock, LOCK_WAIT};
use crate::hooks::{EventContext, HookEvent, HookEventKind, HookResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tools whose completion changes files on disk
pub const FILE_MUTATING_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

/// Persisted correlation state for one client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    /// Created at session start, stable until session end
    #[serde(default)]
    pub transaction_id: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Id of the most recent prompt
    #[serde(default)]
    pub prompt_id: Option<String>,

    /// Repository metadata as of the last write
    #[serde(default)]
    pub git: Option<GitMetadata>,

    /// `Some` while an edit window is open
    #[serde(default)]
    pub edited_files: Option<BTreeSet<String>>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TransactionContext {
    /// Whether this is the cleared (post session end) state
    pub fn is_empty(&self) -> bool {
        self.transaction_id.is_none()
            && self.session_id.is_none()
            && self.prompt_id.is_none()
            && self.edited_files.is_none()
    }

    fn view(&self) -> EventContext {
        EventContext {
            transaction_id: self.transaction_id.clone(),
            prompt_id: self.prompt_id.clone(),
            git: self.git.clone(),
            edited_files: None,
        }
    }
}

/// What one event does to the stored context
#[derive(Debug, PartialEq)]
struct Transition {
    /// New file contents, `None` to leave the file alone
    persist: Option<TransactionContext>,

    /// Enrichment for the event
    context: EventContext,
}

/// Paths an edit-style tool touched, from its input
pub fn edited_paths(tool_name: &str, tool_input: &Value) -> Vec<String> {
    if !FILE_MUTATING_TOOLS.contains(&tool_name) {
        return Vec::new();
    }

    let mut paths = Vec::new();
    for key in ["file_path", "notebook_path"] {
        if let Some(path) = tool_input.get(key).and_then(Value::as_str) {
            paths.push(path.to_string());
        }
    }
    if let Some(edits) = tool_input.get("edits").and_then(Value::as_array) {
        for edit in edits {
            if let Some(path) = edit.get("file_path").and_then(Value::as_str) {
                paths.push(path.to_string());
            }
        }
    }

    paths.retain(|p| !p.is_empty());
    paths
}

fn transition(
    current: Option<TransactionContext>,
    event: &HookEvent,
    git: Option<GitMetadata>,
    now: DateTime<Utc>,
) -> Transition {
    let current = current.filter(|c| !c.is_empty());

    match event.kind() {
        HookEventKind::SessionStart => {
            let ctx = TransactionContext {
                transaction_id: Some(uuid::Uuid::new_v4().to_string()),
                session_id: Some(event.session_id.clone()),
                prompt_id: None,
                git,
                edited_files: None,
                started_at: Some(now),
                updated_at: Some(now),
            };
            Transition {
                context: ctx.view(),
                persist: Some(ctx),
            }
        }
        HookEventKind::SessionEnd => {
            let context = match current {
                Some(ctx) => TransactionContext { git, ..ctx }.view(),
                None => adhoc(git),
            };
            Transition {
                persist: Some(TransactionContext::default()),
                context,
            }
        }
        HookEventKind::UserPromptSubmit => {
            let mut ctx = current.unwrap_or_else(|| TransactionContext {
                session_id: Some(event.session_id.clone()),
                ..TransactionContext::default()
            });
            ctx.prompt_id = Some(uuid::Uuid::new_v4().to_string());
            ctx.edited_files = Some(BTreeSet::new());
            ctx.git = git;
            ctx.updated_at = Some(now);
            Transition {
                context: ctx.view(),
                persist: Some(ctx),
            }
        }
        HookEventKind::PostToolUse => {
            let Some(mut ctx) = current else {
                return Transition {
                    persist: None,
                    context: adhoc(git),
                };
            };
            ctx.git = git;

            let paths = match (event.tool_name(), event.tool_input()) {
                (Some(name), Some(input)) => edited_paths(name, input),
                _ => Vec::new(),
            };

            let persist = match ctx.edited_files.as_mut() {
                Some(files) if !paths.is_empty() => {
                    files.extend(paths);
                    ctx.updated_at = Some(now);
                    Some(ctx.clone())
                }
                _ => None,
            };

            Transition {
                context: ctx.view(),
                persist,
            }
        }
        HookEventKind::Stop => {
            let Some(mut ctx) = current else {
                return Transition {
                    persist: None,
                    context: EventContext {
                        edited_files: Some(Vec::new()),
                        ..adhoc(git)
                    },
                };
            };
            ctx.git = git;

            let window = ctx.edited_files.take();
            let persist = window.is_some().then(|| {
                ctx.updated_at = Some(now);
                ctx.clone()
            });

            let mut context = ctx.view();
            context.edited_files = Some(window.unwrap_or_default().into_iter().collect());
            Transition { persist, context }
        }
        _ => match current {
            Some(ctx) => Transition {
                persist: None,
                context: TransactionContext { git, ..ctx }.view(),
            },
            None => Transition {
                persist: None,
                context: adhoc(git),
            },
        },
    }
}

fn adhoc(git: Option<GitMetadata>) -> EventContext {
    EventContext {
        git,
        ..EventContext::default()
    }
}

/// Reads and rewrites the per-client context file
#[derive(Clone)]
pub struct ContextStore {
    path: PathBuf,
    instances_path: PathBuf,
    collector: Option<Arc<dyn GitCollector>>,
}

impl ContextStore {
    /// Create a store over `path`, caching repository instance ids in `instances_path`
    pub fn new(path: impl Into<PathBuf>, instances_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            instances_path: instances_path.into(),
            collector: None,
        }
    }

    /// Collect repository metadata with the given collector
    pub fn with_git_collector(mut self, collector: Arc<dyn GitCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Path of the context file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted context; `None` when absent or cleared
    pub fn load(&self) -> HookResult<Option<TransactionContext>> {
        let content = match persist::read_optional(&self.path)? {
            Some(content) if !content.trim().is_empty() => content,
            _ => return Ok(None),
        };
        let ctx: TransactionContext = serde_json::from_str(&content)?;
        Ok(Some(ctx).filter(|c| !c.is_empty()))
    }

    /// Replace the persisted context
    pub fn save(&self, ctx: &TransactionContext) -> HookResult<()> {
        let _lock = FileLock::acquire(&self.path, LOCK_WAIT)?;
        self.write(ctx)
    }

    /// Reset the persisted context to empty without removing the file
    pub fn clear(&self) -> HookResult<()> {
        self.save(&TransactionContext::default())
    }

    fn write(&self, ctx: &TransactionContext) -> HookResult<()> {
        let json = serde_json::to_vec_pretty(ctx)?;
        persist::write_atomic(&self.path, &json)
    }

    /// Current repository metadata for `cwd`, with its cached instance id
    pub async fn repository_metadata(&self, cwd: &Path) -> Option<GitMetadata> {
        let collector = self.collector.as_ref()?;
        let snapshot = collector.snapshot(cwd).await?;

        match self.instance_id(&snapshot.repo_root).await {
            Ok(id) => Some(snapshot.into_metadata(id)),
            Err(e) => {
                warn!("Failed to read repository instance cache: {}", e);
                None
            }
        }
    }

    async fn instance_id(&self, repo_root: &Path) -> HookResult<String> {
        let _lock = FileLock::acquire_async(&self.instances_path, LOCK_WAIT).await?;

        let mut instances: BTreeMap<String, String> =
            match persist::read_optional(&self.instances_path)? {
                Some(content) if !content.trim().is_empty() => serde_json::from_str(&content)?,
                _ => BTreeMap::new(),
            };

        let key = repo_root.to_string_lossy().into_owned();
        if let Some(id) = instances.get(&key) {
            return Ok(id.clone());
        }

        let id = uuid::Uuid::new_v4().to_string();
        debug!("New repository instance {} for {}", id, key);
        instances.insert(key, id.clone());
        persist::write_atomic(&self.instances_path, &serde_json::to_vec_pretty(&instances)?)?;
        Ok(id)
    }

    /// Attach correlation context to `event`, persisting any lifecycle transition.
    ///
    /// Never fails: store errors are logged and the event is enriched with
    /// whatever could be read.
    pub async fn enrich(&self, event: &HookEvent) -> HookEvent {
        let git = self.repository_metadata(&event.cwd).await;

        let context = match self.apply(event, git.clone()).await {
            Ok(context) => context,
            Err(e) => {
                warn!(
                    "Context store update failed for {} event: {}",
                    event.kind(),
                    e
                );
                adhoc(git)
            }
        };

        event.with_context(context)
    }

    async fn apply(&self, event: &HookEvent, git: Option<GitMetadata>) -> HookResult<EventContext> {
        let _lock = FileLock::acquire_async(&self.path, LOCK_WAIT).await?;

        let current = match self.load() {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("Unreadable context file {}, starting fresh: {}", self.path.display(), e);
                None
            }
        };

        let Transition { persist, context } = transition(current, event, git, Utc::now());
        if let Some(ctx) = persist {
            debug!(kind = %event.kind(), "Persisting transaction context");
            self.write(&ctx)?;
        }
        Ok(context)
    }
}
