use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use adx_types::{Assignments, Condition, DspInfo, Operator, TargetingClause};

/// Immutable boolean-retrieval index over DSP targeting documents.
///
/// Only active documents are indexed. Positive conditions (EQ/IN) feed
/// inverted postings keyed by (field, value); documents that cannot be
/// reached through postings alone (no targeting at all, or a clause
/// whose conditions are all NOT_IN/GT/LT) sit on a scan list that every
/// retrieval checks. Candidates from both sources are then verified
/// clause by clause, so retrieval never does a full scan over the doc
/// set in the common case but stays exact.
///
/// Updates are handled by building a replacement and swapping the
/// published snapshot; the index itself is never mutated.
pub struct TargetingIndex {
    docs: Vec<DspInfo>,
    by_id: HashMap<String, u32>,
    postings: HashMap<(String, String), Vec<u32>>,
    scan_docs: Vec<u32>,
    updated_at: DateTime<Utc>,
}

impl TargetingIndex {
    /// Build from the full definition map. Non-active documents are
    /// dropped here; doc order is by dsp_id for reproducible tie-breaks.
    pub fn build(definitions: &HashMap<String, DspInfo>) -> Self {
        let mut ids: Vec<&String> = definitions
            .iter()
            .filter(|(_, d)| d.status.is_active())
            .map(|(id, _)| id)
            .collect();
        ids.sort();

        let mut docs = Vec::with_capacity(ids.len());
        let mut by_id = HashMap::with_capacity(ids.len());
        let mut postings: HashMap<(String, String), Vec<u32>> = HashMap::new();
        let mut scan_docs = Vec::new();

        for id in ids {
            let info = definitions[id].clone();
            let ord = docs.len() as u32;
            by_id.insert(info.dsp_id.clone(), ord);

            match info.targeting.as_ref() {
                None => scan_docs.push(ord),
                Some(t) if t.clauses.is_empty() => scan_docs.push(ord),
                Some(t) => {
                    let mut needs_scan = false;
                    for clause in &t.clauses {
                        let mut indexed = false;
                        for cond in &clause.conditions {
                            if matches!(cond.op, Operator::Eq | Operator::In) {
                                indexed = true;
                                for value in &cond.values {
                                    postings
                                        .entry((cond.field.clone(), value.clone()))
                                        .or_default()
                                        .push(ord);
                                }
                            }
                        }
                        // A clause with no positive condition can match a
                        // request that hits no posting at all.
                        if !indexed {
                            needs_scan = true;
                        }
                    }
                    if needs_scan {
                        scan_docs.push(ord);
                    }
                }
            }

            docs.push(info);
        }

        for list in postings.values_mut() {
            list.dedup();
        }

        Self {
            docs,
            by_id,
            postings,
            scan_docs,
            updated_at: Utc::now(),
        }
    }

    /// Bidder ids whose targeting matches the assignments. Empty
    /// assignments match every active document. Result order follows
    /// doc order; callers must not depend on it.
    pub fn retrieve(&self, assignments: &Assignments) -> Vec<String> {
        if assignments.is_empty() {
            return self.docs.iter().map(|d| d.dsp_id.clone()).collect();
        }

        let mut seen: HashSet<u32> = HashSet::new();
        for (field, values) in assignments {
            for value in values {
                if let Some(list) = self.postings.get(&(field.clone(), value.clone())) {
                    seen.extend(list.iter().copied());
                }
            }
        }
        seen.extend(self.scan_docs.iter().copied());

        let mut ordinals: Vec<u32> = seen.into_iter().collect();
        ordinals.sort_unstable();

        ordinals
            .into_iter()
            .map(|ord| &self.docs[ord as usize])
            .filter(|doc| doc_matches(doc, assignments))
            .map(|doc| doc.dsp_id.clone())
            .collect()
    }

    pub fn get(&self, dsp_id: &str) -> Option<&DspInfo> {
        self.by_id.get(dsp_id).map(|&ord| &self.docs[ord as usize])
    }

    pub fn contains(&self, dsp_id: &str) -> bool {
        self.by_id.contains_key(dsp_id)
    }

    pub fn all_active(&self) -> impl Iterator<Item = &DspInfo> {
        self.docs.iter()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

fn doc_matches(doc: &DspInfo, assignments: &Assignments) -> bool {
    match doc.targeting.as_ref() {
        // No targeting document means match-all.
        None => true,
        Some(t) if t.clauses.is_empty() => true,
        Some(t) => t.clauses.iter().any(|c| clause_matches(c, assignments)),
    }
}

fn clause_matches(clause: &TargetingClause, assignments: &Assignments) -> bool {
    clause
        .conditions
        .iter()
        .all(|cond| condition_matches(cond, assignments))
}

fn condition_matches(cond: &Condition, assignments: &Assignments) -> bool {
    let req_values = assignments.get(&cond.field);
    match cond.op {
        Operator::Eq | Operator::In => match req_values {
            None => false,
            Some(values) => values.iter().any(|v| cond.values.contains(v)),
        },
        // Vacuously true when the field is absent from the request.
        Operator::NotIn => match req_values {
            None => true,
            Some(values) => !values.iter().any(|v| cond.values.contains(v)),
        },
        // String-lexicographic compare on the first value of each side.
        Operator::Gt => match (req_values.and_then(|v| v.first()), cond.values.first()) {
            (Some(req), Some(target)) => req > target,
            _ => false,
        },
        Operator::Lt => match (req_values.and_then(|v| v.first()), cond.values.first()) {
            (Some(req), Some(target)) => req < target,
            _ => false,
        },
    }
}
