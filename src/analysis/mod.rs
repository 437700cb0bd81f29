pub mod pareto;
