/*!
# Saving weighted samples to CSV

Enable via the `csv` feature.
*/

use std::error::Error;
use std::fs::File;

use csv::Writer;

use crate::history::History;

/**
Saves the weighted samples of a [`History`] as a CSV file.

The resulting CSV file will have:
- A header row containing `"round"`, `"weight"`, and one column per dimension
  named `"dim_0"`, `"dim_1"`, etc.
- One row per sample, in the order the samples were drawn.

# Examples

```rust
use mini_pmc::history::History;
use mini_pmc::io::csv::save_csv;
use ndarray::arr2;

let mut history = History::new(3, 0);
history.append(2).assign(&arr2(&[[0.5, 1.0, 2.0], [1.5, 3.0, 4.0]]));

save_csv(&history, "/tmp/weighted_samples.csv").expect("Expecting saving data to succeed");
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv(history: &History, filename: &str) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let n_dims = history.width().saturating_sub(1);

    let mut header: Vec<String> = vec!["round".to_string(), "weight".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{}", i)));
    wtr.write_record(&header)?;

    for round in 0..history.n_runs() {
        let Some(run) = history.run(round) else {
            continue;
        };
        for sample in run.outer_iter() {
            let mut row = vec![round.to_string()];
            row.extend(sample.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}
