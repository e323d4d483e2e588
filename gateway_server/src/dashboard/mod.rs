//! Admin dashboard data.

pub mod kpi;
