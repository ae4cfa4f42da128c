//! Select/retry verdicts over a batch of generated candidates.
//!
//! The evaluator collaborator returns free-form text that should contain a
//! JSON report. [`parse_report`] extracts it, [`decide`] applies the gate
//! rules for the current attempt, and [`fallback_verdict`] covers evaluator
//! errors so a verdict always exists.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the ladder should do with the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAction {
    Select,
    Retry,
}

/// Position of the current attempt on the retry ladder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFlags {
    pub is_escalation_check: bool,
    pub is_absolute_final_attempt: bool,
}

/// How strictly the batch is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Retry when every candidate has at least one material flaw.
    Strict,
    /// Retry (escalate) only when every candidate is fundamentally flawed.
    Lenient,
    /// Always select.
    Final,
}

impl GateFlags {
    pub fn mode(&self) -> GateMode {
        if self.is_absolute_final_attempt {
            GateMode::Final
        } else if self.is_escalation_check {
            GateMode::Lenient
        } else {
            GateMode::Strict
        }
    }
}

/// Worst flaw an evaluator found in a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlawSeverity {
    None,
    Minor,
    Material,
    Fundamental,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAssessment {
    pub index: usize,
    pub severity: FlawSeverity,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Parsed evaluator output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorReport {
    pub action: QualityAction,
    #[serde(default)]
    pub chosen_index: Option<usize>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub assessments: Vec<CandidateAssessment>,
}

/// Final gate output. `chosen_index` is always a valid candidate index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub action: QualityAction,
    pub chosen_index: usize,
    pub reasoning: String,
    pub is_final_attempt: bool,
}

/// Prefix of the reasoning string of every fallback verdict.
pub const EVALUATOR_FAILURE_PREFIX: &str = "evaluator failure";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Extract the JSON object embedded in raw evaluator text.
///
/// Anything before the first `{` and after the last `}` is ignored, which
/// tolerates code fences and prose around the payload.
pub fn parse_report(raw: &str) -> Result<EvaluatorReport, CoreError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => {
            return Err(CoreError::Validation(
                "Evaluator output contains no JSON object".to_string(),
            ))
        }
    };
    serde_json::from_str(json)
        .map_err(|e| CoreError::Validation(format!("Evaluator output is not a valid report: {e}")))
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Apply the gate rules to a parsed report.
///
/// With per-candidate assessments the action is recomputed from the
/// severities and the least-flawed candidate is chosen, preferring the
/// evaluator's own pick on a tie. Candidates missing from the assessments
/// count as unflawed. Without any assessment the evaluator's own action is
/// used. On the final attempt the result is always `select`.
pub fn decide(
    report: EvaluatorReport,
    flags: GateFlags,
    candidate_count: usize,
) -> Result<QualityVerdict, CoreError> {
    if candidate_count == 0 {
        return Err(CoreError::Validation(
            "Quality gate needs at least one candidate".to_string(),
        ));
    }
    let mode = flags.mode();

    let in_range = |a: &&CandidateAssessment| a.index < candidate_count;
    let (action, chosen_index) = if !report.assessments.iter().any(|a| in_range(&a)) {
        let chosen = report
            .chosen_index
            .filter(|i| *i < candidate_count)
            .unwrap_or(0);
        let action = match mode {
            GateMode::Final => QualityAction::Select,
            _ => report.action,
        };
        (action, chosen)
    } else {
        // Candidates the evaluator did not assess carry no reported flaw.
        let mut severities = vec![FlawSeverity::None; candidate_count];
        for a in report.assessments.iter().filter(in_range) {
            severities[a.index] = severities[a.index].max(a.severity);
        }
        let least = severities.iter().copied().min().unwrap_or(FlawSeverity::None);
        let best = report
            .chosen_index
            .filter(|i| severities.get(*i) == Some(&least))
            .or_else(|| severities.iter().position(|s| *s == least))
            .unwrap_or(0);
        let all_at_least = |floor: FlawSeverity| severities.iter().all(|s| *s >= floor);
        let action = match mode {
            GateMode::Final => QualityAction::Select,
            GateMode::Lenient if all_at_least(FlawSeverity::Fundamental) => QualityAction::Retry,
            GateMode::Strict if all_at_least(FlawSeverity::Material) => QualityAction::Retry,
            _ => QualityAction::Select,
        };
        (action, best)
    };

    Ok(QualityVerdict {
        action,
        chosen_index,
        reasoning: report.reasoning,
        is_final_attempt: flags.is_absolute_final_attempt,
    })
}

/// Verdict used when the evaluator errors or its output cannot be parsed.
pub fn fallback_verdict(flags: GateFlags, cause: &str) -> QualityVerdict {
    let action = if flags.is_absolute_final_attempt {
        QualityAction::Select
    } else {
        QualityAction::Retry
    };
    QualityVerdict {
        action,
        chosen_index: 0,
        reasoning: format!("{EVALUATOR_FAILURE_PREFIX}: {cause}"),
        is_final_attempt: flags.is_absolute_final_attempt,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const STRICT: GateFlags = GateFlags {
        is_escalation_check: false,
        is_absolute_final_attempt: false,
    };
    const LENIENT: GateFlags = GateFlags {
        is_escalation_check: true,
        is_absolute_final_attempt: false,
    };
    const FINAL: GateFlags = GateFlags {
        is_escalation_check: false,
        is_absolute_final_attempt: true,
    };

    fn assessed(severities: &[FlawSeverity]) -> EvaluatorReport {
        EvaluatorReport {
            action: QualityAction::Select,
            chosen_index: None,
            reasoning: "assessed".into(),
            assessments: severities
                .iter()
                .enumerate()
                .map(|(index, severity)| CandidateAssessment {
                    index,
                    severity: *severity,
                    notes: None,
                })
                .collect(),
        }
    }

    // -- parsing --

    #[test]
    fn parses_report_wrapped_in_prose() {
        let raw = "Here you go:\n```json\n{\"action\":\"retry\",\"chosen_index\":1,\"reasoning\":\"sleeves wrong\"}\n```";
        let report = parse_report(raw).unwrap();
        assert_eq!(report.action, QualityAction::Retry);
        assert_eq!(report.chosen_index, Some(1));
        assert!(report.assessments.is_empty());
    }

    #[test]
    fn rejects_output_without_json() {
        assert!(parse_report("looks fine to me").is_err());
        assert!(parse_report("} backwards {").is_err());
    }

    // -- mode --

    #[test]
    fn final_flag_wins_over_escalation() {
        let flags = GateFlags {
            is_escalation_check: true,
            is_absolute_final_attempt: true,
        };
        assert_eq!(flags.mode(), GateMode::Final);
        assert_eq!(LENIENT.mode(), GateMode::Lenient);
        assert_eq!(STRICT.mode(), GateMode::Strict);
    }

    // -- decide with assessments --

    #[test]
    fn strict_retries_when_all_materially_flawed() {
        let v = decide(
            assessed(&[FlawSeverity::Material, FlawSeverity::Fundamental]),
            STRICT,
            2,
        )
        .unwrap();
        assert_eq!(v.action, QualityAction::Retry);
        assert_eq!(v.chosen_index, 0);
    }

    #[test]
    fn strict_selects_least_flawed() {
        let v = decide(
            assessed(&[FlawSeverity::Material, FlawSeverity::Minor]),
            STRICT,
            2,
        )
        .unwrap();
        assert_eq!(v.action, QualityAction::Select);
        assert_eq!(v.chosen_index, 1);
    }

    #[test]
    fn lenient_accepts_material_flaws() {
        let v = decide(
            assessed(&[FlawSeverity::Material, FlawSeverity::Material]),
            LENIENT,
            2,
        )
        .unwrap();
        assert_eq!(v.action, QualityAction::Select);
    }

    #[test]
    fn lenient_escalates_when_all_fundamental() {
        let v = decide(
            assessed(&[FlawSeverity::Fundamental, FlawSeverity::Fundamental]),
            LENIENT,
            2,
        )
        .unwrap();
        assert_eq!(v.action, QualityAction::Retry);
    }

    #[test]
    fn final_attempt_never_retries() {
        let severities = [FlawSeverity::Fundamental, FlawSeverity::Fundamental];
        let v = decide(assessed(&severities), FINAL, 2).unwrap();
        assert_eq!(v.action, QualityAction::Select);
        assert!(v.is_final_attempt);

        let bare = EvaluatorReport {
            action: QualityAction::Retry,
            chosen_index: Some(1),
            reasoning: String::new(),
            assessments: vec![],
        };
        let v = decide(bare, FINAL, 2).unwrap();
        assert_eq!(v.action, QualityAction::Select);
        assert_eq!(v.chosen_index, 1);
    }

    #[test]
    fn unassessed_candidate_counts_as_unflawed() {
        let report = EvaluatorReport {
            action: QualityAction::Select,
            chosen_index: Some(1),
            reasoning: "second looks right".into(),
            assessments: vec![CandidateAssessment {
                index: 0,
                severity: FlawSeverity::Material,
                notes: None,
            }],
        };
        let v = decide(report, STRICT, 2).unwrap();
        assert_eq!(v.action, QualityAction::Select);
        assert_eq!(v.chosen_index, 1);
    }

    #[test]
    fn evaluator_pick_breaks_severity_ties() {
        let mut report = assessed(&[FlawSeverity::Minor, FlawSeverity::Minor]);
        report.chosen_index = Some(1);
        assert_eq!(decide(report, STRICT, 2).unwrap().chosen_index, 1);
    }

    #[test]
    fn out_of_range_assessments_are_ignored() {
        let mut report = assessed(&[FlawSeverity::Material]);
        report.assessments.push(CandidateAssessment {
            index: 9,
            severity: FlawSeverity::None,
            notes: None,
        });
        let v = decide(report, STRICT, 1).unwrap();
        assert_eq!(v.action, QualityAction::Retry);
    }

    // -- decide without assessments --

    #[test]
    fn evaluator_action_trusted_without_assessments() {
        let report = EvaluatorReport {
            action: QualityAction::Retry,
            chosen_index: Some(1),
            reasoning: "both off".into(),
            assessments: vec![],
        };
        let v = decide(report, STRICT, 2).unwrap();
        assert_eq!(v.action, QualityAction::Retry);
        assert_eq!(v.chosen_index, 1);
    }

    #[test]
    fn out_of_range_index_clamped_to_zero() {
        let report = EvaluatorReport {
            action: QualityAction::Select,
            chosen_index: Some(7),
            reasoning: String::new(),
            assessments: vec![],
        };
        assert_eq!(decide(report, STRICT, 2).unwrap().chosen_index, 0);
    }

    #[test]
    fn zero_candidates_rejected() {
        assert!(decide(assessed(&[]), STRICT, 0).is_err());
    }

    // -- fallback --

    #[test]
    fn fallback_retries_unless_final() {
        let v = fallback_verdict(STRICT, "timeout");
        assert_eq!(v.action, QualityAction::Retry);
        assert_eq!(v.chosen_index, 0);
        assert!(v.reasoning.starts_with(EVALUATOR_FAILURE_PREFIX));

        let v = fallback_verdict(FINAL, "timeout");
        assert_eq!(v.action, QualityAction::Select);
        assert_eq!(v.chosen_index, 0);
    }
}
