use itertools::Itertools;

use super::OptimizationProblem;

/// Storage charging and discharging decided for one period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StorageFlow {
    pub charge: f64,
    pub discharge: f64,
}

/// Economic dispatch of one period for a fixed commitment.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub generation: Vec<f64>,
    pub renewable_used: f64,
    pub unserved: f64,
    pub surplus: f64,
    /// Variable, unserved-energy and curtailment cost of the period.
    pub cost: f64,
}

enum Block {
    Renewable,
    Unit(usize),
    Unserved,
}

/// Merit-order dispatch of period `t` given which units are on.
///
/// Committed units first run at minimum stable output, or at `fixed_output`
/// when one is given (ramp-limited units on a grid). Storage charging adds to
/// demand and discharging offsets it. Remaining demand is
/// met from the cheapest block: renewables (priced at the negative curtailment
/// penalty they avoid), unit headroom at variable cost, then unserved energy.
/// Must-run output above demand goes to surplus with all renewables curtailed.
/// Ties resolve in the order renewables, units in fleet order, unserved.
pub fn economic_dispatch(
    problem: &OptimizationProblem,
    t: usize,
    commitment: &[bool],
    fixed_output: &[Option<f64>],
    storage: StorageFlow,
) -> Dispatch {
    let demand = problem.demand[t] + storage.charge - storage.discharge;
    let available = problem.renewable[t];
    let mut generation = vec![0.0; problem.units.len()];
    let mut cost = 0.0;

    for (u, unit) in problem.units.iter().enumerate() {
        if commitment[u] {
            let output = fixed_output
                .get(u)
                .copied()
                .flatten()
                .unwrap_or(unit.min_power[t]);
            generation[u] = output;
            cost += unit.variable_cost * output;
        }
    }
    let must_run: f64 = generation.iter().sum();

    if must_run > demand {
        let surplus = must_run - demand;
        cost += problem.curtailment_penalty * (available + surplus);
        return Dispatch {
            generation,
            renewable_used: 0.0,
            unserved: 0.0,
            surplus,
            cost,
        };
    }

    let mut blocks = vec![(-problem.curtailment_penalty, Block::Renewable, available)];
    for (u, unit) in problem.units.iter().enumerate() {
        let fixed = fixed_output.get(u).copied().flatten().is_some();
        if commitment[u] && !fixed {
            blocks.push((
                unit.variable_cost,
                Block::Unit(u),
                unit.max_power[t] - unit.min_power[t],
            ));
        }
    }
    blocks.push((problem.unserved_penalty, Block::Unserved, f64::INFINITY));

    let mut residual = demand - must_run;
    let mut renewable_used = 0.0;
    let mut unserved = 0.0;
    for (price, block, size) in blocks
        .into_iter()
        .sorted_by(|a, b| a.0.total_cmp(&b.0))
    {
        if residual <= 0.0 {
            break;
        }
        let take = residual.min(size);
        residual -= take;
        match block {
            Block::Renewable => renewable_used = take,
            Block::Unit(u) => {
                generation[u] += take;
                cost += price * take;
            }
            Block::Unserved => {
                unserved = take;
                cost += price * take;
            }
        }
    }
    cost += problem.curtailment_penalty * (available - renewable_used);

    Dispatch {
        generation,
        renewable_used,
        unserved,
        surplus: 0.0,
        cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::UnitFormulation;

    fn unit(id: &str, max: f64, min: f64, cost: f64) -> UnitFormulation {
        UnitFormulation {
            unit_id: id.to_string(),
            reactivity: vec![1.2],
            max_power: vec![max],
            min_power: vec![min],
            variable_cost: cost,
            start_cost: 0.0,
            shut_cost: 0.0,
            initial_commit: true,
            initial_output_above_min: 0.0,
            forced_off_periods: 0,
            depletion_period: None,
            forced_on_periods: 0,
            dead_time_periods: 0,
            min_up_periods: 0,
            ramp_up: None,
            ramp_down: None,
        }
    }

    fn problem(demand: f64, renewable: f64, units: Vec<UnitFormulation>) -> OptimizationProblem {
        OptimizationProblem {
            window_index: 0,
            first_period: 0,
            committed_periods: 1,
            demand: vec![demand],
            renewable: vec![renewable],
            units,
            storage: None,
            unserved_penalty: 9000.0,
            curtailment_penalty: 2.0,
        }
    }

    fn dispatch(p: &OptimizationProblem, commitment: &[bool]) -> Dispatch {
        economic_dispatch(p, 0, commitment, &[], StorageFlow::default())
    }

    #[test]
    fn test_renewables_before_units() {
        let p = problem(1000.0, 300.0, vec![unit("a", 1000.0, 200.0, 10.0)]);
        let d = dispatch(&p, &[true]);
        assert_eq!(d.renewable_used, 300.0);
        assert_eq!(d.generation, vec![700.0]);
        assert_eq!(d.unserved, 0.0);
        assert_eq!(d.cost, 7000.0);
    }

    #[test]
    fn test_cheaper_unit_fills_first() {
        let p = problem(
            900.0,
            0.0,
            vec![unit("a", 500.0, 100.0, 20.0), unit("b", 500.0, 100.0, 5.0)],
        );
        let d = dispatch(&p, &[true, true]);
        assert_eq!(d.generation, vec![400.0, 500.0]);
    }

    #[test]
    fn test_shortfall_is_unserved() {
        let p = problem(1200.0, 0.0, vec![unit("a", 800.0, 400.0, 10.0)]);
        let d = dispatch(&p, &[true]);
        assert_eq!(d.generation, vec![800.0]);
        assert_eq!(d.unserved, 400.0);
        assert_eq!(d.cost, 8000.0 + 400.0 * 9000.0);
    }

    #[test]
    fn test_must_run_excess_goes_to_surplus() {
        let p = problem(300.0, 100.0, vec![unit("a", 800.0, 500.0, 10.0)]);
        let d = dispatch(&p, &[true]);
        assert_eq!(d.generation, vec![500.0]);
        assert_eq!(d.renewable_used, 0.0);
        assert_eq!(d.surplus, 200.0);
        assert_eq!(d.cost, 5000.0 + 2.0 * 300.0);
    }

    #[test]
    fn test_offline_units_produce_nothing() {
        let p = problem(500.0, 0.0, vec![unit("a", 800.0, 400.0, 10.0)]);
        let d = dispatch(&p, &[false]);
        assert_eq!(d.generation, vec![0.0]);
        assert_eq!(d.unserved, 500.0);
    }

    #[test]
    fn test_fixed_output_is_not_redispatched() {
        let p = problem(
            900.0,
            0.0,
            vec![unit("a", 1000.0, 200.0, 5.0), unit("b", 1000.0, 200.0, 20.0)],
        );
        let d = economic_dispatch(&p, 0, &[true, true], &[Some(300.0), None], StorageFlow::default());
        assert_eq!(d.generation, vec![300.0, 600.0]);
        assert_eq!(d.cost, 300.0 * 5.0 + 600.0 * 20.0);
    }

    #[test]
    fn test_storage_shifts_net_demand() {
        let p = problem(800.0, 0.0, vec![unit("a", 1000.0, 200.0, 10.0)]);
        let charging = StorageFlow {
            charge: 100.0,
            discharge: 0.0,
        };
        assert_eq!(economic_dispatch(&p, 0, &[true], &[], charging).generation, vec![900.0]);
        let discharging = StorageFlow {
            charge: 0.0,
            discharge: 700.0,
        };
        let d = economic_dispatch(&p, 0, &[true], &[], discharging);
        assert_eq!(d.generation, vec![200.0]);
        assert_eq!(d.surplus, 100.0);
    }
}
