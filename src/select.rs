// src/select.rs

//! Export variable selection.
//!
//! Builds the ordered list of state components and derived variables to
//! export for a plot call. Selections are recomputed on every export and
//! never cached: the active variable sets can change between calls through
//! runtime configuration.

use crate::config::VarSet;
use crate::state::{DeriveRegistry, IndexType, StateSlotDescriptor};

/// The ordered export selection for one plot or checkpoint call.
///
/// Ordering is significant and fixed once computed: raw components first in
/// ascending (slot, component) order, then derived variables in registry
/// registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    /// Selected (slot index, component index) pairs.
    pub raw: Vec<(usize, usize)>,
    /// Selected derived variables as (name, component count).
    pub derived: Vec<(String, usize)>,
    /// Flattened exported variable names, raw then derived components.
    pub names: Vec<String>,
}

impl SelectionPlan {
    /// Total number of exported field components.
    pub fn num_components(&self) -> usize {
        self.raw.len() + self.derived.iter().map(|(_, n)| n).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.derived.is_empty()
    }
}

/// Select raw state components: ascending (slot, component) order, keeping a
/// pair only when the predicate accepts the component's registered name and
/// the slot is cell-centered.
pub fn select_raw(slots: &[StateSlotDescriptor], pred: &VarSet) -> Vec<(usize, usize)> {
    let mut raw = Vec::new();
    for (slot_idx, slot) in slots.iter().enumerate() {
        for (comp_idx, comp_name) in slot.components.iter().enumerate() {
            if pred.matches(comp_name) && slot.index_type == IndexType::Cell {
                raw.push((slot_idx, comp_idx));
            }
        }
    }
    raw
}

/// Select derived variables in registration order, emitting each matched
/// name with its registered arity.
pub fn select_derived(registry: &DeriveRegistry, pred: &VarSet) -> Vec<(String, usize)> {
    registry
        .iter()
        .filter(|rec| pred.matches(rec.name()))
        .map(|rec| (rec.name().to_string(), rec.num_derive()))
        .collect()
}

/// Build the complete ordered plan for one export call.
pub fn build_plan(
    slots: &[StateSlotDescriptor],
    registry: &DeriveRegistry,
    raw_pred: &VarSet,
    derived_pred: &VarSet,
) -> SelectionPlan {
    let raw = select_raw(slots, raw_pred);
    let derived = select_derived(registry, derived_pred);

    let mut names = Vec::with_capacity(raw.len());
    for &(slot_idx, comp_idx) in &raw {
        names.push(slots[slot_idx].components[comp_idx].clone());
    }
    for rec in registry.iter().filter(|rec| derived_pred.matches(rec.name())) {
        names.extend(rec.components().iter().cloned());
    }

    SelectionPlan { raw, derived, names }
}

/// Build a checkpoint plan: every component of every persisted slot,
/// regardless of index type or plot predicates. Derived data is never
/// checkpointed.
pub fn checkpoint_plan(slots: &[StateSlotDescriptor]) -> SelectionPlan {
    let mut raw = Vec::new();
    let mut names = Vec::new();
    for (slot_idx, slot) in slots.iter().enumerate() {
        if !slot.persisted {
            continue;
        }
        for (comp_idx, comp_name) in slot.components.iter().enumerate() {
            raw.push((slot_idx, comp_idx));
            names.push(comp_name.clone());
        }
    }
    SelectionPlan {
        raw,
        derived: Vec::new(),
        names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::state::FieldArray;

    fn test_slots() -> Vec<StateSlotDescriptor> {
        vec![
            StateSlotDescriptor::new(
                "state",
                IndexType::Cell,
                vec![
                    "density".to_string(),
                    "x_velocity".to_string(),
                    "y_velocity".to_string(),
                ],
            ),
            StateSlotDescriptor::new(
                "scalars",
                IndexType::Cell,
                vec!["temperature".to_string()],
            ),
        ]
    }

    fn test_registry() -> DeriveRegistry {
        let mut registry = DeriveRegistry::new();
        registry.register("Speed", vec!["Speed".to_string()], derive_stub);
        registry.register("WorkEstimate", vec!["WorkEstimate".to_string()], derive_stub);
        registry
    }

    fn derive_stub(ctx: &crate::state::DeriveContext<'_>) -> Result<FieldArray> {
        Ok(FieldArray::define(ctx.geom, 1, ctx.rank))
    }

    #[test]
    fn test_raw_selection_order_is_slot_then_component() {
        let slots = test_slots();
        let raw = select_raw(&slots, &VarSet::all());
        assert_eq!(raw, vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
    }

    #[test]
    fn test_raw_selection_filters_by_name() {
        let slots = test_slots();
        let raw = select_raw(&slots, &VarSet::names(["density", "temperature"]));
        assert_eq!(raw, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_raw_selection_excludes_non_cell_centered() {
        let mut slots = test_slots();
        slots.push(StateSlotDescriptor::new(
            "fluxes",
            IndexType::Node,
            vec!["x_flux".to_string()],
        ));
        let raw = select_raw(&slots, &VarSet::all());
        // The node-centered slot contributes nothing even under ALL.
        assert!(!raw.iter().any(|&(s, _)| s == 2));
    }

    #[test]
    fn test_derived_selection_keeps_registration_order() {
        let registry = test_registry();
        let derived = select_derived(&registry, &VarSet::all());
        assert_eq!(
            derived,
            vec![
                ("Speed".to_string(), 1),
                ("WorkEstimate".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let slots = test_slots();
        let registry = test_registry();
        let pred = VarSet::names(["density", "x_velocity", "Speed"]);

        let a = build_plan(&slots, &registry, &pred, &pred);
        let b = build_plan(&slots, &registry, &pred, &pred);
        assert_eq!(a, b);
    }

    #[test]
    fn test_five_variable_scenario() {
        // Two slots of cardinality 3 and 1, everything selected, plus the
        // derived "Speed": five variables, raw names first.
        let slots = test_slots();
        let registry = test_registry();

        let plan = build_plan(
            &slots,
            &registry,
            &VarSet::all(),
            &VarSet::names(["Speed"]),
        );

        assert_eq!(plan.num_components(), 5);
        assert_eq!(
            plan.names,
            vec!["density", "x_velocity", "y_velocity", "temperature", "Speed"]
        );
    }

    #[test]
    fn test_empty_plan() {
        let slots = test_slots();
        let registry = test_registry();
        let plan = build_plan(&slots, &registry, &VarSet::none(), &VarSet::none());
        assert!(plan.is_empty());
        assert_eq!(plan.num_components(), 0);
    }

    #[test]
    fn test_checkpoint_plan_skips_unpersisted_slots() {
        let mut slots = test_slots();
        slots.push(
            StateSlotDescriptor::new(
                "work_estimate",
                IndexType::Cell,
                vec!["WorkEstimate".to_string()],
            )
            .not_persisted(),
        );

        let plan = checkpoint_plan(&slots);
        assert_eq!(plan.raw, vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
        assert!(plan.derived.is_empty());
        assert_eq!(plan.names.len(), 4);
    }

    #[test]
    fn test_multi_component_derived_flattens_names() {
        let mut registry = DeriveRegistry::new();
        registry.register(
            "Vorticity",
            vec!["wx".to_string(), "wy".to_string(), "wz".to_string()],
            |ctx| Ok(FieldArray::define(ctx.geom, 3, ctx.rank)),
        );

        let plan = build_plan(
            &test_slots(),
            &registry,
            &VarSet::none(),
            &VarSet::all(),
        );
        assert_eq!(plan.num_components(), 3);
        assert_eq!(plan.names, vec!["wx", "wy", "wz"]);
    }
}
