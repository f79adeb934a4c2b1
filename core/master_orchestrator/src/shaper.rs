//! Pure payload shaping: turns `(agent_id, raw_request, extracted_params)`
//! into the exact JSON body a given worker expects. No I/O, no side
//! effects — every function here is a plain transformation.

use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Canonical id of the fallback agent used whenever routing can't land on
/// anything more specific — an unknown oracle suggestion, a keyword miss,
/// or the livelock escape hatch.
pub const GENERIC_LLM_WRAPPER_AGENT_ID: &str = "generic_llm_wrapper_agent";

/// Sum type over every worker shape this supervisor knows how to build.
/// An agent whose id doesn't match a known variant falls back to
/// `GenericLlmWrapper`, matching the Intent Identifier's own fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    QuizGenerator,
    ResearchFinder,
    AssignmentCoach,
    PlagiarismChecker,
    GenericLlmWrapper,
    ConceptReinforcement,
    PresentationFeedback,
    DailyRevisionProctor,
    PeerCollaboration,
    ExamReadiness,
}

impl AgentKind {
    pub fn from_agent_id(agent_id: &str) -> AgentKind {
        match agent_id {
            "quiz_generator_agent" => AgentKind::QuizGenerator,
            "research_finder_agent" => AgentKind::ResearchFinder,
            "assignment_coach_agent" => AgentKind::AssignmentCoach,
            "plagiarism_checker_agent" => AgentKind::PlagiarismChecker,
            "concept_reinforcement_agent" => AgentKind::ConceptReinforcement,
            "presentation_feedback_agent" => AgentKind::PresentationFeedback,
            "daily_revision_proctor_agent" => AgentKind::DailyRevisionProctor,
            "peer_collaboration_agent" => AgentKind::PeerCollaboration,
            "exam_readiness_agent" => AgentKind::ExamReadiness,
            _ => AgentKind::GenericLlmWrapper,
        }
    }

    /// Params this shape cannot proceed without — drives the Intent
    /// Identifier's confidence gating (a missing required param forces
    /// `is_ambiguous`).
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            AgentKind::QuizGenerator => &[],
            AgentKind::ResearchFinder => &[],
            AgentKind::AssignmentCoach => &["task_description"],
            AgentKind::PlagiarismChecker => &["text_content"],
            AgentKind::GenericLlmWrapper => &[],
            AgentKind::ConceptReinforcement => &[],
            AgentKind::PresentationFeedback => &[],
            AgentKind::DailyRevisionProctor => &[],
            AgentKind::PeerCollaboration => &[],
            AgentKind::ExamReadiness => &["subject"],
        }
    }
}

type Params = HashMap<String, Value>;

fn get_str(params: &Params, key: &str) -> Option<String> {
    params.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn get_str_or(params: &Params, key: &str, default: &str) -> String {
    get_str(params, key).filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
}

fn get_u64_or(params: &Params, key: &str, default: u64) -> u64 {
    params
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(default)
}

fn get_bool_or(params: &Params, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// A bare string becomes a singleton list; an existing list passes
/// through; anything else is empty.
fn coerce_list(params: &Params, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(arr)) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Split a comma-separated string into trimmed, non-empty members, or pass
/// an existing list through unchanged.
fn coerce_list_or_split(params: &Params, key: &str) -> Vec<String> {
    match params.get(key) {
        Some(Value::Array(arr)) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        _ => Vec::new(),
    }
}

/// Normalizes the many shapes a "year range" can arrive in:
/// `{from,to}`, `{from_year,to_year}`, `{start_year,end_year}`, or a bare
/// string like `"2019-2023"` / `"2019 to 2023"`. Returns `None` if nothing
/// resembling two 4-digit years is found.
fn normalize_year_range(value: &Value) -> Option<(u32, u32)> {
    match value {
        Value::Object(map) => {
            let pick = |keys: &[&str]| -> Option<u32> {
                keys.iter().find_map(|k| map.get(*k)).and_then(|v| {
                    v.as_u64().map(|n| n as u32).or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                })
            };
            let from = pick(&["from", "from_year", "start_year"]);
            let to = pick(&["to", "to_year", "end_year"]);
            match (from, to) {
                (Some(f), Some(t)) => Some((f, t)),
                _ => None,
            }
        }
        Value::String(s) => {
            let re = Regex::new(r"(\d{4}).*?(\d{4})").ok()?;
            let caps = re.captures(s)?;
            let from: u32 = caps.get(1)?.as_str().parse().ok()?;
            let to: u32 = caps.get(2)?.as_str().parse().ok()?;
            Some((from, to))
        }
        _ => None,
    }
}

/// Shape a payload for the given agent. `agent_id` is assumed already
/// alias-normalized by the caller (the dispatcher resolves through the
/// registry first).
pub fn shape_payload(agent_id: &str, raw_request: &str, extracted_params: &Params) -> Value {
    match AgentKind::from_agent_id(agent_id) {
        AgentKind::QuizGenerator => shape_quiz_generator(raw_request, extracted_params),
        AgentKind::ResearchFinder => shape_research_finder(raw_request, extracted_params),
        AgentKind::AssignmentCoach => shape_assignment_coach(raw_request, extracted_params),
        AgentKind::PlagiarismChecker => shape_plagiarism_checker(raw_request, extracted_params),
        AgentKind::GenericLlmWrapper => shape_generic_llm_wrapper(raw_request, extracted_params),
        AgentKind::ConceptReinforcement => shape_concept_reinforcement(raw_request, extracted_params),
        AgentKind::PresentationFeedback => shape_presentation_feedback(raw_request, extracted_params),
        AgentKind::DailyRevisionProctor => shape_daily_revision_proctor(raw_request, extracted_params),
        AgentKind::PeerCollaboration => shape_peer_collaboration(raw_request, extracted_params),
        AgentKind::ExamReadiness => shape_exam_readiness(raw_request, extracted_params),
    }
}

fn bloom_level_for(difficulty: &str) -> &'static str {
    match difficulty {
        "easy" => "remember",
        "hard" => "analyze",
        _ => "apply",
    }
}

fn shape_quiz_generator(raw_request: &str, params: &Params) -> Value {
    let topic = get_str_or(params, "topic", "Python Loops");
    let num_questions = get_u64_or(params, "num_questions", 5);
    let difficulty = get_str_or(params, "difficulty", "medium");

    json!({
        "agent_name": "quiz_generator_agent",
        "intent": "generate_quiz",
        "payload": {
            "user_info": {"request": raw_request},
            "quiz_request": {
                "topic": topic,
                "num_questions": num_questions,
                "difficulty": difficulty,
                "bloom_taxonomy_level": bloom_level_for(&difficulty),
            },
            "session_info": {"session_id": Uuid::new_v4().to_string()}
        }
    })
}

fn shape_research_finder(raw_request: &str, params: &Params) -> Value {
    let topic = get_str(params, "topic").filter(|s| !s.is_empty()).unwrap_or_else(|| raw_request.to_string());
    let keywords = coerce_list(params, "keywords");
    let max_results = get_u64_or(params, "max_results", 10);

    let mut data = Map::new();
    data.insert("topic".to_string(), json!(topic));
    data.insert("keywords".to_string(), json!(keywords));
    data.insert("max_results".to_string(), json!(max_results));

    if let Some(year_range) = params.get("year_range").and_then(normalize_year_range) {
        data.insert("year_range".to_string(), json!({"from": year_range.0, "to": year_range.1}));
    }

    json!({ "data": Value::Object(data) })
}

fn shape_assignment_coach(raw_request: &str, params: &Params) -> Value {
    let task_description = get_str(params, "task_description").filter(|s| !s.is_empty()).unwrap_or_else(|| raw_request.to_string());

    json!({
        "request": raw_request,
        "task_description": task_description,
        "subject": get_str(params, "subject"),
        "difficulty_level": get_str(params, "difficulty_level"),
        "deadline": get_str(params, "deadline"),
    })
}

fn shape_plagiarism_checker(raw_request: &str, params: &Params) -> Value {
    let text_content = get_str(params, "text_content").filter(|s| !s.is_empty()).unwrap_or_else(|| raw_request.to_string());

    json!({
        "request": raw_request,
        "text_content": text_content,
        "check_type": get_str_or(params, "check_type", "check"),
        "citation_style": get_str(params, "citation_style"),
    })
}

fn shape_generic_llm_wrapper(raw_request: &str, params: &Params) -> Value {
    json!({
        "request": raw_request,
        "extra_params": params,
    })
}

fn shape_concept_reinforcement(raw_request: &str, params: &Params) -> Value {
    let weak_topics = coerce_list(params, "weak_topics");

    json!({
        "request": raw_request,
        "student_id": get_str_or(params, "student_id", "default_student"),
        "weak_topics": weak_topics,
        "preferences": {
            "learning_style": get_str(params, "learning_style"),
            "max_tasks": get_u64_or(params, "max_tasks", 5),
        }
    })
}

fn shape_presentation_feedback(raw_request: &str, params: &Params) -> Value {
    let transcript = get_str(params, "transcript").filter(|s| !s.is_empty()).unwrap_or_else(|| raw_request.to_string());

    json!({
        "data": {
            "presentation_id": Uuid::new_v4().to_string(),
            "title": get_str(params, "title"),
            "presenter_name": get_str(params, "presenter_name"),
            "transcript": transcript,
            "metadata": params.get("metadata").cloned().unwrap_or(Value::Null),
            "analysis_parameters": {
                "focus_areas": coerce_list(params, "focus_areas"),
                "detail_level": get_str_or(params, "detail_level", "standard"),
            }
        }
    })
}

/// `"Alice (2024-01-01T00:00:00Z): did the thing"` -> `{user_id, timestamp, message}`.
fn parse_discussion_line(line: &str) -> Option<Value> {
    let re = Regex::new(r"^\s*(?P<user>[^(]+)\s*\((?P<ts>[^)]+)\)\s*:\s*(?P<msg>.+)$").ok()?;
    let caps = re.captures(line)?;
    Some(json!({
        "user_id": caps["user"].trim(),
        "timestamp": caps["ts"].trim(),
        "message": caps["msg"].trim(),
    }))
}

fn shape_daily_revision_proctor(raw_request: &str, params: &Params) -> Value {
    let activity_log = params.get("activity_log").cloned().unwrap_or_else(|| {
        json!([{
            "date": chrono::Utc::now().date_naive().to_string(),
            "note": raw_request,
        }])
    });

    json!({
        "request": raw_request,
        "student_id": get_str_or(params, "student_id", "default_student"),
        "profile": params.get("profile").cloned().unwrap_or(Value::Null),
        "study_schedule": {
            "preferred_times": coerce_list(params, "preferred_times"),
            "daily_goal_hours": params.get("daily_goal_hours").and_then(Value::as_f64).unwrap_or(2.0),
        },
        "activity_log": activity_log,
        "user_feedback": get_str(params, "user_feedback"),
        "context": params.get("context").cloned().unwrap_or(Value::Null),
    })
}

fn shape_peer_collaboration(raw_request: &str, params: &Params) -> Value {
    let team_members = coerce_list_or_split(params, "team_members");

    let discussion_logs: Vec<Value> = match params.get("discussion_logs") {
        Some(Value::Array(arr)) => arr.clone(),
        Some(Value::String(s)) => s.lines().filter_map(parse_discussion_line).collect(),
        _ => Vec::new(),
    };

    json!({
        "request": raw_request,
        "project_id": get_str(params, "project_id").unwrap_or_else(|| Uuid::new_v4().to_string()),
        "team_members": team_members,
        "action": get_str_or(params, "action", "analyze"),
        "discussion_logs": discussion_logs,
    })
}

fn shape_exam_readiness(raw_request: &str, params: &Params) -> Value {
    let question_count = get_u64_or(params, "question_count", 10);
    let assessment_type = get_str_or(params, "assessment_type", "quiz");
    let difficulty = get_str_or(params, "difficulty", "medium");

    let type_counts = params
        .get("type_counts")
        .cloned()
        .unwrap_or_else(|| json!({"mcq": question_count}));

    json!({
        "request": raw_request,
        "subject": get_str(params, "subject"),
        "assessment_type": assessment_type,
        "difficulty": difficulty,
        "question_count": question_count,
        "type_counts": type_counts,
        "allow_latex": get_bool_or(params, "allow_latex", true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn quiz_generator_defaults_topic_and_maps_difficulty_to_bloom_level() {
        let shaped = shape_quiz_generator("quiz me", &params(&[]));
        assert_eq!(shaped["payload"]["quiz_request"]["topic"], "Python Loops");
        assert_eq!(shaped["payload"]["quiz_request"]["num_questions"], 5);
        assert_eq!(shaped["payload"]["quiz_request"]["bloom_taxonomy_level"], "apply");
        assert!(shaped["payload"]["session_info"]["session_id"].is_string());
    }

    #[test]
    fn quiz_generator_honors_extracted_topic_and_difficulty() {
        let shaped = shape_quiz_generator(
            "quiz me on recursion, hard",
            &params(&[("topic", json!("Recursion")), ("difficulty", json!("hard"))]),
        );
        assert_eq!(shaped["payload"]["quiz_request"]["topic"], "Recursion");
        assert_eq!(shaped["payload"]["quiz_request"]["bloom_taxonomy_level"], "analyze");
    }

    #[test]
    fn research_finder_accepts_from_to_year_range() {
        let shaped = shape_research_finder(
            "find papers",
            &params(&[("year_range", json!({"from": 2020, "to": 2023}))]),
        );
        assert_eq!(shaped["data"]["year_range"]["from"], 2020);
        assert_eq!(shaped["data"]["year_range"]["to"], 2023);
    }

    #[test]
    fn research_finder_accepts_bare_string_year_range() {
        let shaped = shape_research_finder(
            "find papers",
            &params(&[("year_range", json!("2019-2023"))]),
        );
        assert_eq!(shaped["data"]["year_range"]["from"], 2019);
        assert_eq!(shaped["data"]["year_range"]["to"], 2023);
    }

    #[test]
    fn research_finder_accepts_start_end_year_keys() {
        let shaped = shape_research_finder(
            "find papers",
            &params(&[("year_range", json!({"start_year": "2018", "end_year": "2022"}))]),
        );
        assert_eq!(shaped["data"]["year_range"]["from"], 2018);
        assert_eq!(shaped["data"]["year_range"]["to"], 2022);
    }

    #[test]
    fn research_finder_falls_back_to_raw_request_for_topic() {
        let shaped = shape_research_finder("neural networks in robotics", &params(&[]));
        assert_eq!(shaped["data"]["topic"], "neural networks in robotics");
    }

    #[test]
    fn concept_reinforcement_coerces_bare_string_to_singleton_list() {
        let shaped = shape_concept_reinforcement(
            "help me with recursion",
            &params(&[("weak_topics", json!("recursion"))]),
        );
        assert_eq!(shaped["weak_topics"], json!(["recursion"]));
        assert_eq!(shaped["student_id"], "default_student");
    }

    #[test]
    fn peer_collaboration_splits_comma_separated_team_members() {
        let shaped = shape_peer_collaboration(
            "help our team",
            &params(&[("team_members", json!("alice, bob , carol"))]),
        );
        assert_eq!(shaped["team_members"], json!(["alice", "bob", "carol"]));
    }

    #[test]
    fn peer_collaboration_normalizes_discussion_log_lines() {
        let shaped = shape_peer_collaboration(
            "summarize our discussion",
            &params(&[("discussion_logs", json!("Alice (2024-01-01T00:00:00Z): let's start\nBob (2024-01-01T00:05:00Z): sounds good"))]),
        );
        let logs = shaped["discussion_logs"].as_array().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0]["user_id"], "Alice");
        assert_eq!(logs[0]["message"], "let's start");
    }

    #[test]
    fn exam_readiness_defaults_type_counts_to_mcq() {
        let shaped = shape_exam_readiness(
            "make me an exam",
            &params(&[("subject", json!("biology")), ("question_count", json!(20))]),
        );
        assert_eq!(shaped["type_counts"], json!({"mcq": 20}));
        assert_eq!(shaped["allow_latex"], true);
    }

    #[test]
    fn presentation_feedback_falls_back_transcript_to_raw_request() {
        let shaped = shape_presentation_feedback("here is my talk transcript", &params(&[]));
        assert_eq!(shaped["data"]["transcript"], "here is my talk transcript");
        assert!(shaped["data"]["presentation_id"].is_string());
    }

    #[test]
    fn agent_kind_required_params_drives_ambiguity_gate() {
        assert_eq!(AgentKind::AssignmentCoach.required_params(), &["task_description"]);
        assert!(AgentKind::QuizGenerator.required_params().is_empty());
    }

    #[test]
    fn unknown_agent_id_falls_back_to_generic_wrapper_shape() {
        let shaped = shape_payload("totally_unknown_agent", "hello", &params(&[]));
        assert_eq!(shaped["request"], "hello");
        assert!(shaped.get("extra_params").is_some());
    }
}
