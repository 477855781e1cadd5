//! Deterministic sibling ordering.
//!
//! Dependencies are shown in the order they occur in the formula text, not in
//! declaration order: for each dependency the minimum index of any of its
//! textual spellings (bare address, `sheet!cell`, `'sheet'!cell`) in the
//! uppercased formula decides its place. Unmatched dependencies keep their
//! declaration order after all matched ones.

use gridvine_core::CellIdentity;

/// Order `deps` by first textual occurrence in `formula_text`.
///
/// Returns the input unchanged when there is no formula text to order by.
pub fn order_dependencies(
    deps: Vec<CellIdentity>,
    formula_text: Option<&str>,
) -> Vec<CellIdentity> {
    let Some(formula) = formula_text else {
        return deps;
    };
    if formula.is_empty() || deps.is_empty() {
        return deps;
    }

    let upper = formula.to_uppercase();
    let unmatched = upper.len() + 1;

    let mut keyed: Vec<(usize, CellIdentity)> = deps
        .into_iter()
        .map(|dep| {
            let cell = dep.cell.to_uppercase();
            let sheet = dep.sheet.to_uppercase();
            let patterns = [
                cell.clone(),
                format!("{sheet}!{cell}"),
                format!("'{sheet}'!{cell}"),
            ];
            let position = patterns
                .iter()
                .filter_map(|p| upper.find(p.as_str()))
                .min()
                .unwrap_or(unmatched);
            (position, dep)
        })
        .collect();

    // Stable: ties and unmatched entries keep declaration order.
    keyed.sort_by_key(|(position, _)| *position);
    keyed.into_iter().map(|(_, dep)| dep).collect()
}
