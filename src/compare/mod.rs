//! Fuzzy function comparator: X-drop dynamic programming and greedy
//! edit-graph alignment, plus two-column diff rendering.
//!
//! `compare` returns the score and edit script directly rather than
//! stashing them behind a shared "last edit script" handle.

use crate::model::{FuncMember, FunctionDescriptor};

/// Per-token match/mismatch/indel weights.
const MAT: f64 = 2.0;
const MIS: f64 = -2.0;
const IND: f64 = MIS - MAT / 2.0; // -3.0

/// Which alignment algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMethod {
    /// Zhang-Schwartz-Wagner-Miller X-drop dynamic programming. Score only;
    /// a script request is silently served by the greedy algorithm instead.
    XDrop,
    /// Greedy edit-graph alignment. Supports edit-script reconstruction.
    Greedy,
}

/// One entry in a reconstructed edit script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    /// `<a>-<b>`: replace left token `a` with right token `b`.
    Replace { left: usize, right: usize },
    /// `<a>>b`: delete left token `a` (right pointer sits at `b`).
    DeleteLeft { left: usize, right: usize },
    /// `<a><b`: insert right token `b` (left pointer sits at `a`).
    InsertRight { left: usize, right: usize },
}

impl EditOp {
    pub fn to_text(&self) -> String {
        match self {
            EditOp::Replace { left, right } => format!("{}-{}", left, right),
            EditOp::DeleteLeft { left, right } => format!("{}>{}", left, right),
            EditOp::InsertRight { left, right } => format!("{}<{}", left, right),
        }
    }
}

/// Render one function to its diff-form token sequence: one opaque string
/// per member record.
pub fn tokenize(func: &FunctionDescriptor) -> Vec<String> {
    func.members
        .iter()
        .map(|m| match m {
            FuncMember::Instruction(ins) => format!("{} {}", ins.mnemonic, ins.operands_text),
            FuncMember::Data(data) => data
                .bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<String>(),
        })
        .collect()
}

fn tokens_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn match_penalty(f1: &FunctionDescriptor, f2: &FunctionDescriptor) -> f64 {
    match (f1.primary_name(), f2.primary_name()) {
        (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => 0.0,
        _ => MAT,
    }
}

/// Compare two functions. Returns the similarity in `[0,1]` and, when
/// `build_script` is true, the edit script transforming `f1`'s tokens into
/// `f2`'s.
pub fn compare(
    method: CompareMethod,
    f1: &FunctionDescriptor,
    f2: &FunctionDescriptor,
    build_script: bool,
) -> (f64, Option<Vec<EditOp>>) {
    let left = tokenize(f1);
    let right = tokenize(f2);
    let penalty = match_penalty(f1, f2);

    let (raw_score, ops) = match method {
        CompareMethod::XDrop => {
            let score = xdrop_score(&left, &right);
            let ops = if build_script {
                Some(greedy_align(&left, &right).ops)
            } else {
                None
            };
            (score, ops)
        }
        CompareMethod::Greedy => {
            let alignment = greedy_align(&left, &right);
            (alignment.score, if build_script { Some(alignment.ops) } else { None })
        }
    };

    let denom = (left.len().max(right.len()) as f64) * MAT;
    let similarity = if denom <= 0.0 {
        0.0
    } else {
        ((raw_score - penalty).max(0.0)) / denom
    };
    (similarity, ops)
}

/// X-drop dynamic programming score, computed as a row-major DP table
/// rather than a manually allocated 2D array. With `X = ∞` (the default,
/// no pruning) this agrees exactly with [`greedy_align`]'s score.
fn xdrop_score(left: &[String], right: &[String]) -> f64 {
    let m = left.len();
    let n = right.len();
    let stride = n + 1;
    let mut s = vec![0.0f64; (m + 1) * stride];

    for i in 0..=m {
        s[i * stride] = i as f64 * IND;
    }
    for j in 0..=n {
        s[j] = j as f64 * IND;
    }
    for i in 1..=m {
        for j in 1..=n {
            let diag = s[(i - 1) * stride + (j - 1)]
                + if tokens_eq(&left[i - 1], &right[j - 1]) { MAT } else { MIS };
            let up = s[(i - 1) * stride + j] + IND;
            let left_cell = s[i * stride + (j - 1)] + IND;
            s[i * stride + j] = diag.max(up).max(left_cell);
        }
    }
    s[m * stride + n]
}

struct GreedyAlignment {
    score: f64,
    ops: Vec<EditOp>,
}

/// Greedy edit-graph alignment on `R[d][k]`, `k = i - j`.
fn greedy_align(left: &[String], right: &[String]) -> GreedyAlignment {
    let m = left.len() as i32;
    let n = right.len() as i32;
    let offset = n;
    let width = (m + n + 1).max(1) as usize;

    let extend = |mut i: i32, mut j: i32| -> i32 {
        while i < m && j < n && tokens_eq(&left[i as usize], &right[j as usize]) {
            i += 1;
            j += 1;
        }
        i
    };

    // `landing[d]` / `extended[d]` are indexed by `k + offset`.
    let mut landing_rows: Vec<Vec<i32>> = Vec::new();
    let mut extended_rows: Vec<Vec<i32>> = Vec::new();

    let mut row_landing = vec![i32::MIN; width];
    let mut row_extended = vec![i32::MIN; width];
    row_landing[offset as usize] = 0;
    row_extended[offset as usize] = extend(0, 0);
    landing_rows.push(row_landing);
    extended_rows.push(row_extended);

    let final_k = m - n;
    let mut d_best: i32 = 0;
    if !(extended_rows[0][offset as usize] == m && final_k == 0) {
        let mut l: i32 = 0;
        let mut u: i32 = 0;
        let max_d = m + n;
        let mut found = false;

        for d in 1..=max_d {
            l = (l - 1).max(-n);
            u = (u + 1).min(m);

            let prev_extended = &extended_rows[(d - 1) as usize];
            let mut row_landing = vec![i32::MIN; width];
            let mut row_extended = vec![i32::MIN; width];

            let mut k = l;
            while k <= u {
                let idx = (k + offset) as usize;
                let from_delete = if k - 1 >= -n && k - 1 <= m {
                    let v = prev_extended[(k - 1 + offset) as usize];
                    if v != i32::MIN { Some(v + 1) } else { None }
                } else {
                    None
                };
                let from_sub = if (-n..=m).contains(&k) {
                    let v = prev_extended[(k + offset) as usize];
                    if v != i32::MIN { Some(v + 1) } else { None }
                } else {
                    None
                };
                let from_insert = if k + 1 >= -n && k + 1 <= m {
                    let v = prev_extended[(k + 1 + offset) as usize];
                    if v != i32::MIN { Some(v) } else { None }
                } else {
                    None
                };

                if let Some(x) = [from_delete, from_sub, from_insert]
                    .into_iter()
                    .flatten()
                    .max()
                {
                    let x = x.clamp(0, m);
                    let j = x - k;
                    if j < 0 || j > n {
                        k += 1;
                        continue;
                    }
                    row_landing[idx] = x;
                    let xe = extend(x, j);
                    row_extended[idx] = xe;
                    if xe == m && xe - k == n {
                        d_best = d;
                        found = true;
                    }
                }
                k += 1;
            }

            landing_rows.push(row_landing);
            extended_rows.push(row_extended);

            if found {
                break;
            }

            // `+2`/`-2` clamps, not the classic `+1`/`-1`.
            for k in l..=u {
                let idx = (k + offset) as usize;
                let val = extended_rows[d as usize][idx];
                if val == i32::MIN {
                    continue;
                }
                if val == n + k {
                    l = l.max(k + 2);
                }
                if val == m {
                    u = u.min(k - 2);
                }
            }
            if l > u + 2 {
                break;
            }
        }
    }

    let ops = reconstruct(left, right, &landing_rows, &extended_rows, offset, d_best, final_k);
    let matches = count_matches(&ops, left, right);
    let subs = ops.iter().filter(|o| matches!(o, EditOp::Replace { .. })).count() as f64;
    let indels = ops.len() as f64 - subs;
    let score = matches as f64 * MAT + subs * MIS + indels * IND;

    GreedyAlignment { score, ops }
}

fn count_matches(ops: &[EditOp], left: &[String], _right: &[String]) -> usize {
    let deletes = ops.iter().filter(|o| matches!(o, EditOp::DeleteLeft { .. })).count();
    let subs = ops.iter().filter(|o| matches!(o, EditOp::Replace { .. })).count();
    left.len().saturating_sub(subs + deletes)
}

#[allow(clippy::too_many_arguments)]
fn reconstruct(
    _left: &[String],
    _right: &[String],
    landing_rows: &[Vec<i32>],
    extended_rows: &[Vec<i32>],
    offset: i32,
    d_best: i32,
    final_k: i32,
) -> Vec<EditOp> {
    let mut ops = Vec::new();
    if d_best == 0 {
        return ops;
    }

    let mut d = d_best;
    let mut k = final_k;

    while d > 0 {
        let idx = (k + offset) as usize;
        let landing = landing_rows[d as usize][idx];
        let prev_extended = &extended_rows[(d - 1) as usize];

        let delete_val = if (k - 1 + offset) >= 0 {
            prev_extended.get((k - 1 + offset) as usize).copied()
        } else {
            None
        };
        let sub_val = prev_extended.get((k + offset) as usize).copied();
        let insert_val = prev_extended.get((k + 1 + offset) as usize).copied();

        let j = landing - k;
        if delete_val == Some(landing - 1) {
            ops.push(EditOp::DeleteLeft {
                left: (landing - 1).max(0) as usize,
                right: j.max(0) as usize,
            });
            k -= 1;
        } else if sub_val == Some(landing - 1) {
            ops.push(EditOp::Replace {
                left: (landing - 1).max(0) as usize,
                right: (j - 1).max(0) as usize,
            });
        } else if insert_val == Some(landing) {
            ops.push(EditOp::InsertRight {
                left: landing.max(0) as usize,
                right: (j - 1).max(0) as usize,
            });
            k += 1;
        } else {
            // No predecessor matched (shouldn't happen for a consistent
            // table); stop rather than emit a bogus op.
            break;
        }
        d -= 1;
    }

    ops.reverse();
    ops
}

/// Render a two-column diff.
pub fn diff_text(
    f1: &FunctionDescriptor,
    f2: &FunctionDescriptor,
    ops: &[EditOp],
) -> String {
    let left = tokenize(f1);
    let right = tokenize(f2);
    let left_name = f1.primary_name().unwrap_or("<anonymous>");
    let right_name = f2.primary_name().unwrap_or("<anonymous>");

    let left_max = left.iter().map(|t| t.len()).chain(std::iter::once(left_name.len())).max().unwrap_or(0);
    let right_max = right
        .iter()
        .map(|t| t.len())
        .chain(std::iter::once(right_name.len()))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str(&center(left_name, left_max));
    out.push_str("    ");
    out.push_str(&center(right_name, right_max));
    out.push('\n');
    out.push_str(&"-".repeat(left_max));
    out.push_str("    ");
    out.push_str(&"-".repeat(right_max));
    out.push('\n');

    // Build a dense row plan from the edit script: every left index and
    // every right index appears exactly once, in order.
    let mut li = 0usize;
    let mut ri = 0usize;
    let mut op_iter = ops.iter().peekable();

    while li < left.len() || ri < right.len() {
        match op_iter.peek() {
            Some(EditOp::Replace { left: a, right: b }) if *a == li && *b == ri => {
                emit_row(&mut out, &left[li], &right[ri], " -> ", left_max, right_max);
                li += 1;
                ri += 1;
                op_iter.next();
            }
            Some(EditOp::DeleteLeft { left: a, .. }) if *a == li => {
                emit_row(&mut out, &left[li], "", " >> ", left_max, right_max);
                li += 1;
                op_iter.next();
            }
            Some(EditOp::InsertRight { right: b, .. }) if *b == ri => {
                emit_row(&mut out, "", &right[ri], " << ", left_max, right_max);
                ri += 1;
                op_iter.next();
            }
            _ => {
                if li < left.len() && ri < right.len() && tokens_eq(&left[li], &right[ri]) {
                    emit_row(&mut out, &left[li], &right[ri], " == ", left_max, right_max);
                    li += 1;
                    ri += 1;
                } else if li < left.len() && ri < right.len() {
                    emit_row(&mut out, &left[li], &right[ri], " -- ", left_max, right_max);
                    li += 1;
                    ri += 1;
                } else if li < left.len() {
                    emit_row(&mut out, &left[li], "", " >> ", left_max, right_max);
                    li += 1;
                } else {
                    emit_row(&mut out, "", &right[ri], " << ", left_max, right_max);
                    ri += 1;
                }
            }
        }
    }

    out
}

fn emit_row(out: &mut String, left: &str, right: &str, sep: &str, left_max: usize, right_max: usize) {
    out.push_str(&format!("{:<width$}", left, width = left_max));
    out.push_str(sep);
    out.push_str(&format!("{:<width$}", right, width = right_max));
    out.push('\n');
}

fn center(text: &str, width: usize) -> String {
    if text.len() >= width {
        return text.to_string();
    }
    let total_pad = width - text.len();
    let left_pad = total_pad / 2;
    let right_pad = total_pad - left_pad;
    format!("{}{}{}", " ".repeat(left_pad), text, " ".repeat(right_pad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FuncMember, InstructionRecord};

    fn func(name: &str, mnemonics: &[&str]) -> FunctionDescriptor {
        FunctionDescriptor {
            main_address: 0,
            names: vec![name.to_string()],
            members: mnemonics
                .iter()
                .map(|m| {
                    FuncMember::Instruction(InstructionRecord {
                        rel_addr: 0,
                        abs_addr: 0,
                        labels: Vec::new(),
                        raw_bytes: Vec::new(),
                        opcode_bytes: Vec::new(),
                        operand_bytes: Vec::new(),
                        dst: None,
                        src: None,
                        src2: None,
                        mnemonic: m.to_string(),
                        operands_text: String::new(),
                    })
                })
                .collect(),
        }
    }

    #[test]
    fn self_identity_scores_one() {
        let f = func("FOO", &["ldaa", "staa", "rts"]);
        let (score, ops) = compare(CompareMethod::Greedy, &f, &f, true);
        assert!((score - 1.0).abs() < 1e-9);
        assert_eq!(ops.unwrap().len(), 0);
    }

    #[test]
    fn differing_labels_apply_penalty() {
        let f1 = func("FOO", &["ldaa", "staa", "rts"]);
        let f2 = func("BAR", &["ldaa", "staa", "rts"]);
        let (score, _) = compare(CompareMethod::Greedy, &f1, &f2, false);
        // (N*mat - mat) / (N*mat) = 1 - 1/N, N=3
        assert!((score - (1.0 - 1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn scenario_c_single_replace() {
        let f1 = func("FOO", &["a", "b", "c"]);
        let f2 = func("FOO", &["a", "x", "c"]);
        let (score, ops) = compare(CompareMethod::Greedy, &f1, &f2, true);
        assert!((score - (1.0 / 3.0)).abs() < 1e-6);
        let ops = ops.unwrap();
        assert_eq!(ops, vec![EditOp::Replace { left: 1, right: 1 }]);
    }

    #[test]
    fn scenario_d_single_delete() {
        let f1 = func("FOO", &["a", "b", "c"]);
        let f2 = func("FOO", &["a", "c"]);
        let (_, ops) = compare(CompareMethod::Greedy, &f1, &f2, true);
        let ops = ops.unwrap();
        assert_eq!(ops, vec![EditOp::DeleteLeft { left: 1, right: 1 }]);
    }

    #[test]
    fn xdrop_and_greedy_agree_with_infinite_x() {
        let f1 = func("FOO", &["a", "b", "c", "d"]);
        let f2 = func("FOO", &["a", "x", "c", "e", "d"]);
        let (xdrop_score, _) = compare(CompareMethod::XDrop, &f1, &f2, false);
        let (greedy_score, _) = compare(CompareMethod::Greedy, &f1, &f2, false);
        assert!((xdrop_score - greedy_score).abs() < 1e-9);
    }

    #[test]
    fn shifted_window_counts_all_matches() {
        let f1 = func("FOO", &["a", "b", "c", "d", "e"]);
        let f2 = func("FOO", &["b", "c", "d", "e", "f"]);
        let (score, _) = compare(CompareMethod::Greedy, &f1, &f2, false);
        assert!((score - 0.2).abs() < 1e-6);
        let (xdrop_score, _) = compare(CompareMethod::XDrop, &f1, &f2, false);
        assert!((xdrop_score - 0.2).abs() < 1e-6);
    }

    #[test]
    fn empty_inputs_score_zero() {
        let f1 = func("FOO", &[]);
        let f2 = func("BAR", &[]);
        let (score, ops) = compare(CompareMethod::Greedy, &f1, &f2, true);
        assert_eq!(score, 0.0);
        assert_eq!(ops.unwrap().len(), 0);
    }
}
