//! Task Planner: classify an objective, then either keep it local or split it
//! into subtasks with minimal skill sets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::error::PlannerError;
use crate::llm::{LlmProvider, Reasoning};
use crate::protocol::is_valid_task_id;

const COMPLEX_INDICATORS: &[&str] = &[
    "download",
    "fetch",
    "scrape",
    "network",
    "web",
    "http",
    "url",
    "sensor",
    "gpio",
    "hardware",
    "camera",
    "i2c",
    "spi",
    "compute",
    "calculate",
    "process",
    "analyze large",
    "batch",
    "deploy",
    "install",
    "configure system",
];

const SIMPLE_INDICATORS: &[&str] = &[
    "read file",
    "write file",
    "list",
    "show",
    "display",
    "get status",
    "check",
    "what is",
    "tell me",
    "simple query",
];

const SKILL_KEYWORDS: &[(&str, &[&str])] = &[
    ("web_fetch", &["download", "fetch", "web", "http", "url", "scrape"]),
    ("file_ops", &["read", "write", "file", "directory"]),
    ("shell", &["command", "execute", "run", "shell"]),
];

const CLASSIFY_PROMPT: &str = "Classify the task. SIMPLE: can be handled locally \
(file operations, simple queries, status checks). MODERATE: could go either way \
(code writing, moderate computation). COMPLEX: should be delegated (network access, \
hardware access, heavy compute). Respond with only one word: SIMPLE, MODERATE or COMPLEX.";

const DECOMPOSE_PROMPT: &str = "Split the task into the smallest useful set of subtasks. \
Respond with JSON only, no prose, in the form \
{\"subtasks\":[{\"id\":\"s1\",\"objective\":\"...\",\"skills\":[\"web_fetch\"],\"depends_on\":[]}]}. \
Available skills: web_fetch, file_ops, shell. List only the skills each subtask needs. \
Use depends_on for subtasks that need another subtask's result; independent subtasks run in parallel.";

/// Complexity class of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// One delegated unit of an objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub objective: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskPlan {
    pub objective: String,
    pub complexity: Complexity,
    pub handle_locally: bool,
    pub subtasks: Vec<SubTask>,
    pub reasoning: String,
    /// Set when planning fell back because a capability was unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl TaskPlan {
    fn local(objective: &str, complexity: Complexity, reasoning: impl Into<String>) -> Self {
        Self {
            objective: objective.to_string(),
            complexity,
            handle_locally: true,
            subtasks: Vec::new(),
            reasoning: reasoning.into(),
            degraded: None,
        }
    }

    fn delegated(
        objective: &str,
        complexity: Complexity,
        subtasks: Vec<SubTask>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            objective: objective.to_string(),
            complexity,
            handle_locally: false,
            subtasks,
            reasoning: reasoning.into(),
            degraded: None,
        }
    }

    /// Group subtasks into dependency layers. Every subtask in a layer
    /// depends only on subtasks in earlier layers, so a layer can run in
    /// parallel.
    pub fn execution_waves(&self) -> Result<Vec<Vec<&SubTask>>, PlannerError> {
        let ids: HashSet<&str> = self.subtasks.iter().map(|s| s.id.as_str()).collect();
        if ids.len() != self.subtasks.len() {
            return Err(PlannerError::InvalidPlan("duplicate subtask id".to_string()));
        }
        for sub in &self.subtasks {
            if let Some(missing) = sub.depends_on.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(PlannerError::InvalidPlan(format!(
                    "subtask {} depends on unknown subtask {missing}",
                    sub.id
                )));
            }
        }

        let mut done: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&SubTask> = self.subtasks.iter().collect();
        let mut waves = Vec::new();
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&SubTask>, Vec<&SubTask>) = remaining
                .into_iter()
                .partition(|s| s.depends_on.iter().all(|d| done.contains(d.as_str())));
            if ready.is_empty() {
                return Err(PlannerError::InvalidPlan(
                    "dependency cycle between subtasks".to_string(),
                ));
            }
            done.extend(ready.iter().map(|s| s.id.as_str()));
            waves.push(ready);
            remaining = blocked;
        }
        Ok(waves)
    }
}

#[derive(Deserialize)]
struct Decomposition {
    subtasks: Vec<SubTask>,
}

/// Keyword classification. `None` means inconclusive.
pub fn classify_heuristic(objective: &str) -> Option<Complexity> {
    let lower = objective.to_lowercase();
    if COMPLEX_INDICATORS.iter().any(|k| lower.contains(k)) {
        Some(Complexity::Complex)
    } else if SIMPLE_INDICATORS.iter().any(|k| lower.contains(k)) {
        Some(Complexity::Simple)
    } else {
        None
    }
}

/// Skills an objective fragment appears to need, in catalog order.
pub fn detect_skills(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    SKILL_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(skill, _)| skill.to_string())
        .collect()
}

/// Split on an ASCII separator, ignoring case.
fn split_ci<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let lower = text.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, _) in lower.match_indices(sep) {
        parts.push(&text[start..idx]);
        start = idx + sep.len();
    }
    parts.push(&text[start..]);
    parts
}

fn clean_fragment(fragment: &str) -> Option<&str> {
    let trimmed = fragment.trim().trim_end_matches('.').trim();
    let trimmed = ["and ", "then "]
        .iter()
        .find_map(|p| {
            trimmed
                .get(..p.len())
                .filter(|head| head.eq_ignore_ascii_case(p))
                .map(|_| trimmed[p.len()..].trim())
        })
        .unwrap_or(trimmed);
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Split without an LLM: " then " separates sequential stages, "and" and
/// "," separate parallel parts within a stage. Each part depends on every
/// part of the previous stage.
pub fn heuristic_split(objective: &str) -> Vec<SubTask> {
    let mut subtasks: Vec<SubTask> = Vec::new();
    let mut previous: Vec<String> = Vec::new();

    for stage in split_ci(objective, " then ") {
        let mut current = Vec::new();
        for part in stage
            .split(',')
            .flat_map(|p| split_ci(p, " and "))
            .filter_map(clean_fragment)
        {
            let id = format!("subtask_{}", subtasks.len() + 1);
            subtasks.push(SubTask {
                id: id.clone(),
                objective: part.to_string(),
                skills: detect_skills(part),
                depends_on: previous.clone(),
            });
            current.push(id);
        }
        if !current.is_empty() {
            previous = current;
        }
    }

    if subtasks.is_empty() {
        subtasks.push(SubTask {
            id: "subtask_1".to_string(),
            objective: objective.trim().to_string(),
            skills: detect_skills(objective),
            depends_on: Vec::new(),
        });
    }
    subtasks
}

/// Pull the JSON object out of a reply that may wrap it in prose or fences.
fn parse_decomposition(reply: &str) -> Result<Vec<SubTask>, PlannerError> {
    let start = reply
        .find('{')
        .ok_or_else(|| PlannerError::Decomposition("no JSON object in reply".to_string()))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| PlannerError::Decomposition("unterminated JSON object".to_string()))?;
    let parsed: Decomposition = serde_json::from_str(&reply[start..=end])
        .map_err(|e| PlannerError::Decomposition(e.to_string()))?;
    if parsed.subtasks.is_empty() {
        return Err(PlannerError::Decomposition("empty subtask list".to_string()));
    }
    let mut subtasks = parsed.subtasks;
    for s in &mut subtasks {
        if s.skills.is_empty() {
            s.skills = detect_skills(&s.objective);
        }
    }
    renumber_unsafe_ids(&mut subtasks);
    Ok(subtasks)
}

/// Subtask ids end up in worker URLs. Replace any that are not
/// `[A-Za-z0-9_-]+` with a free `subtask_N` and follow the rename in
/// `depends_on`.
fn renumber_unsafe_ids(subtasks: &mut [SubTask]) {
    let mut taken: HashSet<String> = subtasks
        .iter()
        .filter(|s| is_valid_task_id(&s.id))
        .map(|s| s.id.clone())
        .collect();
    let mut renamed: HashMap<String, String> = HashMap::new();
    let mut next = 1;
    for sub in subtasks.iter_mut() {
        if is_valid_task_id(&sub.id) {
            continue;
        }
        let fresh = loop {
            let candidate = format!("subtask_{next}");
            next += 1;
            if taken.insert(candidate.clone()) {
                break candidate;
            }
        };
        renamed.insert(std::mem::replace(&mut sub.id, fresh.clone()), fresh);
    }
    if renamed.is_empty() {
        return;
    }
    for sub in subtasks.iter_mut() {
        for dep in &mut sub.depends_on {
            if let Some(fresh) = renamed.get(dep) {
                *dep = fresh.clone();
            }
        }
    }
}

fn parse_classification(reply: &str) -> Complexity {
    let upper = reply.to_uppercase();
    if upper.contains("SIMPLE") {
        Complexity::Simple
    } else if upper.contains("COMPLEX") {
        Complexity::Complex
    } else {
        Complexity::Moderate
    }
}

pub struct TaskPlanner {
    reasoning: Option<Reasoning>,
    config: PlannerConfig,
}

impl TaskPlanner {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, config: PlannerConfig) -> Self {
        Self {
            reasoning: llm.map(|llm| Reasoning::new(llm).with_temperature(0.0)),
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Classify: keywords first, the LLM only when they are inconclusive.
    /// Anything still ambiguous is `Moderate`.
    pub async fn classify(&self, objective: &str) -> Complexity {
        if let Some(c) = classify_heuristic(objective) {
            return c;
        }
        let Some(reasoning) = self.reasoning.as_ref().filter(|_| self.config.llm_classification)
        else {
            return Complexity::Moderate;
        };
        match reasoning.complete_text(CLASSIFY_PROMPT, objective).await {
            Ok(reply) => parse_classification(&reply),
            Err(e) => {
                let e = PlannerError::Classification(e.to_string());
                tracing::warn!(error = %e, "LLM classification failed, assuming moderate");
                Complexity::Moderate
            }
        }
    }

    /// Build a plan. `idle_workers` decides moderate objectives.
    pub async fn analyze(
        &self,
        objective: &str,
        context: Option<&str>,
        idle_workers: usize,
    ) -> TaskPlan {
        let complexity = self.classify(objective).await;
        let plan = match complexity {
            Complexity::Simple => TaskPlan::local(objective, complexity, "simple, handled locally"),
            Complexity::Moderate if idle_workers == 0 => TaskPlan::local(
                objective,
                complexity,
                "moderate with no idle worker, handled locally",
            ),
            Complexity::Moderate => TaskPlan::delegated(
                objective,
                complexity,
                vec![SubTask {
                    id: "subtask_1".to_string(),
                    objective: objective.to_string(),
                    skills: detect_skills(objective),
                    depends_on: Vec::new(),
                }],
                "moderate with an idle worker, delegated whole",
            ),
            Complexity::Complex => self.decompose(objective, context).await,
        };
        tracing::info!(
            complexity = ?plan.complexity,
            local = plan.handle_locally,
            subtasks = plan.subtasks.len(),
            degraded = plan.degraded.is_some(),
            "Plan ready"
        );
        plan
    }

    async fn decompose(&self, objective: &str, context: Option<&str>) -> TaskPlan {
        let complexity = Complexity::Complex;
        let Some(reasoning) = self
            .reasoning
            .as_ref()
            .filter(|_| self.config.llm_decomposition)
        else {
            return TaskPlan::delegated(
                objective,
                complexity,
                heuristic_split(objective),
                "complex, split heuristically",
            );
        };

        let prompt = match context {
            Some(ctx) if !ctx.trim().is_empty() => format!("Task: {objective}\n\nContext:\n{ctx}"),
            _ => format!("Task: {objective}"),
        };
        let reply = match reasoning.complete_text(DECOMPOSE_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                let e = PlannerError::from(e);
                tracing::warn!(error = %e, "Decomposition unavailable, handling locally");
                let mut plan =
                    TaskPlan::local(objective, complexity, "decomposition failed, handled locally");
                plan.degraded = Some(format!("decomposition unavailable ({e}); ran without workers"));
                return plan;
            }
        };

        let candidate = parse_decomposition(&reply).and_then(|subtasks| {
            let plan = TaskPlan::delegated(objective, complexity, subtasks, "complex, split by LLM");
            plan.execution_waves()?;
            Ok(plan)
        });
        match candidate {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "Unusable decomposition, splitting heuristically");
                TaskPlan::delegated(
                    objective,
                    complexity,
                    heuristic_split(objective),
                    "complex, LLM split unusable, split heuristically",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedLlm, Step, text_step};

    fn heuristic_only() -> TaskPlanner {
        TaskPlanner::new(None, PlannerConfig::default())
    }

    fn with_llm(steps: Vec<Step>) -> TaskPlanner {
        TaskPlanner::new(Some(Arc::new(ScriptedLlm::new(steps))), PlannerConfig::default())
    }

    #[test]
    fn keyword_classification() {
        assert_eq!(
            classify_heuristic("Download https://example.com and summarize"),
            Some(Complexity::Complex)
        );
        assert_eq!(classify_heuristic("What is the time?"), Some(Complexity::Simple));
        assert_eq!(classify_heuristic("Write a haiku about autumn"), None);
    }

    #[test]
    fn skill_detection() {
        assert_eq!(detect_skills("fetch the url"), vec!["web_fetch"]);
        assert_eq!(
            detect_skills("Run a command and write the output to a file"),
            vec!["file_ops", "shell"]
        );
        assert!(detect_skills("compose a poem").is_empty());
    }

    #[test]
    fn heuristic_split_builds_stages() {
        let subtasks =
            heuristic_split("Download page A, download page B then write a summary file");
        assert_eq!(subtasks.len(), 3);
        assert_eq!(subtasks[0].objective, "Download page A");
        assert_eq!(subtasks[1].objective, "download page B");
        assert!(subtasks[0].depends_on.is_empty() && subtasks[1].depends_on.is_empty());
        assert_eq!(subtasks[2].depends_on, vec!["subtask_1", "subtask_2"]);
        assert_eq!(subtasks[2].skills, vec!["file_ops"]);

        let single = heuristic_split("fetch the weather page");
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].skills, vec!["web_fetch"]);
    }

    #[test]
    fn waves_follow_dependencies() {
        let plan = TaskPlan::delegated(
            "x",
            Complexity::Complex,
            heuristic_split("fetch a and fetch b then merge them then save it"),
            "",
        );
        let waves = plan.execution_waves().unwrap();
        let ids: Vec<Vec<&str>> = waves
            .iter()
            .map(|w| w.iter().map(|s| s.id.as_str()).collect())
            .collect();
        assert_eq!(
            ids,
            vec![vec!["subtask_1", "subtask_2"], vec!["subtask_3"], vec!["subtask_4"]]
        );
    }

    #[test]
    fn cycles_and_dangling_dependencies_are_rejected() {
        let sub = |id: &str, deps: &[&str]| SubTask {
            id: id.into(),
            objective: id.into(),
            skills: vec![],
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
        };
        let cyclic = TaskPlan::delegated(
            "x",
            Complexity::Complex,
            vec![sub("a", &["b"]), sub("b", &["a"])],
            "",
        );
        assert!(cyclic.execution_waves().is_err());
        let dangling = TaskPlan::delegated("x", Complexity::Complex, vec![sub("a", &["z"])], "");
        assert!(dangling.execution_waves().is_err());
    }

    #[tokio::test]
    async fn moderate_depends_on_idle_workers() {
        let planner = heuristic_only();
        let busy = planner.analyze("Write a haiku", None, 0).await;
        assert_eq!(busy.complexity, Complexity::Moderate);
        assert!(busy.handle_locally);

        let idle = planner.analyze("Write a haiku", None, 2).await;
        assert!(!idle.handle_locally);
        assert_eq!(idle.subtasks.len(), 1);
    }

    #[tokio::test]
    async fn simple_stays_local() {
        let plan = heuristic_only().analyze("show me the status", None, 3).await;
        assert!(plan.handle_locally);
        assert_eq!(plan.complexity, Complexity::Simple);
    }

    #[tokio::test]
    async fn llm_classifies_ambiguous_objectives() {
        let planner = with_llm(vec![text_step("COMPLEX"), Step::Error]);
        // Classified complex by the model, then decomposition fails.
        let plan = planner.analyze("Write a haiku", None, 1).await;
        assert_eq!(plan.complexity, Complexity::Complex);
        assert!(plan.handle_locally);
        assert!(plan.degraded.is_some());
    }

    #[tokio::test]
    async fn llm_decomposition_is_used_when_valid() {
        let reply = r#"Sure! ```json
{"subtasks":[
  {"id":"a","objective":"fetch page one","skills":["web_fetch"]},
  {"id":"b","objective":"fetch page two"},
  {"id":"c","objective":"combine","skills":[],"depends_on":["a","b"]}
]}
```"#;
        let planner = with_llm(vec![text_step(reply)]);
        let plan = planner.analyze("download two pages and combine", None, 3).await;
        assert!(!plan.handle_locally);
        assert_eq!(plan.subtasks.len(), 3);
        assert_eq!(plan.subtasks[1].skills, vec!["web_fetch"]);
        assert_eq!(plan.execution_waves().unwrap().len(), 2);
    }

    #[test]
    fn url_unsafe_ids_are_renumbered() {
        let reply = r#"{"subtasks":[
  {"id":"fetch/a","objective":"fetch page one"},
  {"id":"subtask_1","objective":"fetch page two"},
  {"id":"sum?up","objective":"combine","depends_on":["fetch/a","subtask_1"]}
]}"#;
        let subtasks = parse_decomposition(reply).unwrap();
        let ids: Vec<&str> = subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["subtask_2", "subtask_1", "subtask_3"]);
        assert_eq!(subtasks[2].depends_on, vec!["subtask_2", "subtask_1"]);
        assert!(subtasks.iter().all(|s| is_valid_task_id(&s.id)));
    }

    #[tokio::test]
    async fn unusable_decomposition_falls_back_to_heuristic() {
        let planner = with_llm(vec![text_step("I cannot do that")]);
        let plan = planner
            .analyze("download page A and download page B", None, 3)
            .await;
        assert!(!plan.handle_locally);
        assert_eq!(plan.subtasks.len(), 2);
        assert!(plan.degraded.is_none());

        let cyclic = r#"{"subtasks":[{"id":"a","objective":"x","depends_on":["a"]}]}"#;
        let planner = with_llm(vec![text_step(cyclic)]);
        let plan = planner.analyze("fetch the url", None, 1).await;
        assert_eq!(plan.subtasks[0].id, "subtask_1");
    }
}
