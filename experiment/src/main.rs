use std::{error::Error, fs::File, io::Write};

use bctree::{score, Dataset, Searcher, TreeError};
use mcts::{forest::render, search_and_inspect, MctsSearcher, SearchConfig, SearchLimit};
use serde::Serialize;
use text_io::read;

// iteration budgets of a sweep
const BUDGETS: [u32; 11] = [
  300, 1_000, 3_000, 10_000, 30_000, 60_000, 100_000, 200_000, 300_000, 400_000, 500_000,
];

#[derive(Serialize)]
struct Record {
  budget: u32,
  tree: String,
  bacc: f64,
  size: usize,
  score: f64,
  time: f64,
  timed_out: bool,
}

/// Reads a binary csv with a header row and the label in the first column.
fn load(path: &str) -> Result<Dataset, Box<dyn Error>> {
  let mut reader = csv::Reader::from_path(path)?;
  let mut features = vec![];
  let mut labels = vec![];
  for record in reader.records() {
    let record = record?;
    let mut values = record.iter().map(|v| v.trim().parse::<u8>());
    labels.push(values.next().ok_or("empty row")??);
    features.push(values.collect::<Result<Vec<_>, _>>()?);
  }
  Ok(Dataset::new(features, labels)?)
}

fn run(config: &SearchConfig, data: &Dataset, budget: u32) -> Result<Record, TreeError> {
  let searcher = MctsSearcher::new(config.clone().set_limit(SearchLimit::new(budget)));
  let outcome = searcher.run(data)?;
  Ok(Record {
    budget,
    tree: outcome.tree.to_string(),
    bacc: outcome.tree.balanced_accuracy(data)?,
    size: outcome.tree.size(),
    score: score(&outcome.tree, data, config.regularization)?,
    time: outcome.elapsed.as_secs_f64(),
    timed_out: outcome.timed_out,
  })
}

/// Searches with `budget` iterations and writes the final statistics graph
/// to `path`.
fn dot(
  config: &SearchConfig,
  data: &Dataset,
  path: &str,
  budget: u32,
  theta: u32,
  depth: u32,
) -> Result<String, Box<dyn Error>> {
  let config = config.clone().set_limit(SearchLimit::new(budget));
  let (outcome, written) = search_and_inspect(data, &config, |forest| {
    File::create(path).and_then(|file| render::save(forest, file, theta, depth))
  })?;
  written?;
  Ok(outcome.tree.to_string())
}

fn set(config: SearchConfig, key: &str, value: &str) -> Result<SearchConfig, Box<dyn Error>> {
  let config = match key {
    "c" => config.set_exploration(value.parse()?),
    "k" => config.set_playouts(value.parse()?),
    "reg" => config.set_regularization(value.parse()?),
    "seed" => config.set_seed(value.parse()?),
    "workers" => config.set_workers(value.parse()?),
    "rave" if value == "off" => config.set_rave(None),
    "rave" => config.set_rave(Some(value.parse()?)),
    _ => return Err(format!("unknown parameter {key}").into()),
  };
  config.validate()?;
  Ok(config)
}

fn main() {
  let prompt = ">";
  let mut config = SearchConfig::default().set_playouts(1000);
  let mut data: Option<Dataset> = None;
  loop {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
    let command: String = read!();
    match command.as_str() {
      "load" => {
        let path: String = read!();
        match load(&path) {
          Ok(d) => {
            println!("{} rows, {} features", d.n_rows(), d.n_features());
            data = Some(d);
          }
          Err(e) => println!("error: {e}"),
        }
      }
      "set" => {
        let key: String = read!();
        let value: String = read!();
        match set(config.clone(), &key, &value) {
          Ok(c) => config = c,
          Err(e) => println!("error: {e}"),
        }
      }
      "print" => {
        println!("{config:?}");
      }
      "search" => {
        let budget: String = read!();
        let Some(d) = &data else {
          println!("error: no data loaded");
          continue;
        };
        let budget = match budget.parse() {
          Ok(b) => b,
          Err(e) => {
            println!("error: {e}");
            continue;
          }
        };
        match run(&config, d, budget) {
          Ok(r) => {
            println!("time = {:.3}", r.time);
            println!("{}", r.tree);
            println!("bacc = {}", r.bacc);
            println!("size = {}", r.size);
            println!("score = {}", r.score);
          }
          Err(e) => println!("error: {e}"),
        }
      }
      "dot" => {
        let path: String = read!();
        let budget: String = read!();
        let theta: String = read!();
        let depth: String = read!();
        let Some(d) = &data else {
          println!("error: no data loaded");
          continue;
        };
        let parsed = (budget.parse(), theta.parse(), depth.parse());
        let (Ok(budget), Ok(theta), Ok(depth)) = parsed else {
          println!("error: usage dot <file> <budget> <theta> <depth>");
          continue;
        };
        match dot(&config, d, &path, budget, theta, depth) {
          Ok(tree) => println!("{tree}, graph written to {path}"),
          Err(e) => println!("error: {e}"),
        }
      }
      "sweep" => {
        let Some(d) = &data else {
          println!("error: no data loaded");
          continue;
        };
        for budget in BUDGETS {
          match run(&config, d, budget).map(|r| serde_json::to_string(&r)) {
            Ok(Ok(line)) => println!("{line}"),
            Ok(Err(e)) => println!("error: {e}"),
            Err(e) => {
              println!("error: {e}");
              break;
            }
          }
        }
      }
      "exit" | "quit" | "bye" | "" => {
        return;
      }
      _ => {
        println!("unknown command {command}");
      }
    }
  }
}
