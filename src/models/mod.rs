pub mod answer;
pub mod attempt;
pub mod exam;
