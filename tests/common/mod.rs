//! Shared regatta test domain
//!
//! `Regattas -> Regatta -> Race -> CompetitorResult`, a handful of dimensions
//! and statistics on the competitor results, and a gate to hold queries
//! inside a domain callback.

#![allow(dead_code)]

use datamining_engine::components::DataRetrieverChainDefinition;
use datamining_engine::error::ProcessingFailure;
use datamining_engine::{Element, Function, TypeTag, Value};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

// =============================================================================
// Domain
// =============================================================================

pub struct Regatta {
    pub name: &'static str,
    pub boat_class: &'static str,
    pub races: Vec<Race>,
}

pub struct Race {
    pub name: &'static str,
    pub results: Vec<Arc<CompetitorResult>>,
}

pub struct CompetitorResult {
    pub sail_number: &'static str,
    pub nationality: &'static str,
    pub points: f64,
}

pub fn regattas_type() -> TypeTag {
    TypeTag::new("Regattas")
}

pub fn regatta_type() -> TypeTag {
    TypeTag::new("Regatta")
}

pub fn race_type() -> TypeTag {
    TypeTag::new("Race")
}

pub fn result_type() -> TypeTag {
    TypeTag::new("CompetitorResult")
}

fn result(sail_number: &'static str, nationality: &'static str, points: f64) -> Arc<CompetitorResult> {
    Arc::new(CompetitorResult {
        sail_number,
        nationality,
        points,
    })
}

/// Two regattas, three races, eight competitor results
///
/// Points by nationality: GER 1+2+3+1 = 7, DEN 2+1 = 3, NED 3+2 = 5.
pub fn data_source() -> Element {
    let regattas = vec![
        Arc::new(Regatta {
            name: "Kieler Woche",
            boat_class: "49er",
            races: vec![
                Race {
                    name: "R1",
                    results: vec![
                        result("GER 1", "GER", 1.0),
                        result("DEN 7", "DEN", 2.0),
                        result("NED 3", "NED", 3.0),
                    ],
                },
                Race {
                    name: "R2",
                    results: vec![
                        result("DEN 7", "DEN", 1.0),
                        result("NED 3", "NED", 2.0),
                        result("GER 1", "GER", 2.0),
                    ],
                },
            ],
        }),
        Arc::new(Regatta {
            name: "Warnemünder Woche",
            boat_class: "Laser",
            races: vec![Race {
                name: "R1",
                results: vec![result("GER 5", "GER", 3.0), result("GER 9", "GER", 1.0)],
            }],
        }),
    ];
    Element::new(regattas_type(), regattas)
}

// =============================================================================
// Retriever Chain
// =============================================================================

pub fn results_chain() -> DataRetrieverChainDefinition {
    DataRetrieverChainDefinition::builder(regattas_type(), result_type(), "Competitor results")
        .start_with("Regatta", regatta_type(), |e, _| {
            let regattas = e.downcast_ref::<Vec<Arc<Regatta>>>().cloned().unwrap_or_default();
            Ok(regattas
                .into_iter()
                .map(|r| Element::from_arc(regatta_type(), r))
                .collect())
        })
        .add_after("Race", race_type(), |e, _| {
            let Some(regatta) = e.downcast_ref::<Regatta>() else {
                return Ok(Vec::new());
            };
            Ok(regatta
                .races
                .iter()
                .map(|race| {
                    Element::new(
                        race_type(),
                        Race {
                            name: race.name,
                            results: race.results.clone(),
                        },
                    )
                })
                .collect())
        })
        .end_with("Competitor result", result_type(), |e, _| {
            let Some(race) = e.downcast_ref::<Race>() else {
                return Ok(Vec::new());
            };
            Ok(race
                .results
                .iter()
                .map(|r| Element::from_arc(result_type(), Arc::clone(r)))
                .collect())
        })
        .expect("valid chain")
}

// =============================================================================
// Functions
// =============================================================================

fn competitor(e: &Element) -> Result<&CompetitorResult, ProcessingFailure> {
    e.downcast_ref::<CompetitorResult>()
        .ok_or_else(|| ProcessingFailure::element("not a competitor result"))
}

pub fn points() -> Function {
    Function::statistic(result_type(), "points", TypeTag::float(), |e| {
        Ok(Value::Float(competitor(e)?.points))
    })
    .with_unit("pt")
    .with_result_decimals(1)
}

/// Fails for every competitor of `nationality`
pub fn points_failing_for(nationality: &'static str) -> Function {
    Function::statistic(result_type(), "points", TypeTag::float(), move |e| {
        let c = competitor(e)?;
        if c.nationality == nationality {
            return Err(ProcessingFailure::element(format!("no points for {}", c.sail_number)));
        }
        Ok(Value::Float(c.points))
    })
}

/// Panics on every element
pub fn points_panicking() -> Function {
    Function::statistic(result_type(), "points", TypeTag::float(), |_| {
        panic!("scoring system unavailable")
    })
}

/// Blocks on `gate` before every evaluation
pub fn points_gated(gate: Arc<Gate>) -> Function {
    Function::statistic(result_type(), "points", TypeTag::float(), move |e| {
        gate.wait();
        Ok(Value::Float(competitor(e)?.points))
    })
}

pub fn nationality() -> Function {
    Function::dimension(result_type(), "nationality", TypeTag::text(), |e| {
        Ok(Value::from(competitor(e)?.nationality))
    })
}

pub fn sail_number() -> Function {
    Function::dimension(result_type(), "sailNumber", TypeTag::text(), |e| {
        Ok(Value::from(competitor(e)?.sail_number))
    })
}

pub fn regatta_name() -> Function {
    Function::dimension(regatta_type(), "name", TypeTag::text(), |e| {
        Ok(e.downcast_ref::<Regatta>().map(|r| r.name).into())
    })
}

pub fn boat_class() -> Function {
    Function::dimension(regatta_type(), "boatClass", TypeTag::text(), |e| {
        Ok(e.downcast_ref::<Regatta>().map(|r| r.boat_class).into())
    })
}

pub fn functions() -> Vec<Function> {
    vec![points(), nationality(), sail_number(), regatta_name(), boat_class()]
}

// =============================================================================
// Helpers
// =============================================================================

/// Holds domain callbacks until opened
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
