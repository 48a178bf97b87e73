//! Data preparation for fitting: column selection from tables, the
//! training/validation split, per-epoch shuffles and minibatches.

use crate::error::{Result, VariationalError};
use crate::value::Column;

use ndarray::{Array2, ArrayD, Axis, IxDyn};
use rand::prelude::SliceRandom;

/// Numeric table with named columns (rows are samples)
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<String>,
    values: Array2<f32>,
}

impl Table {
    pub fn new(columns: Vec<String>, values: Array2<f32>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(VariationalError::InvalidData(format!(
                "{} column names for {} columns",
                columns.len(),
                values.ncols()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    fn index_of(&self, col: &Column) -> Result<usize> {
        match col {
            Column::Index(i) if *i < self.columns.len() => Ok(*i),
            Column::Index(i) => Err(VariationalError::ColumnOutOfRange {
                index: *i,
                ncols: self.columns.len(),
            }),
            Column::Name(name) => self
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| VariationalError::MissingColumn(name.clone())),
        }
    }

    /// Sub-table of the selected columns, in selection order
    pub fn select(&self, cols: &[Column]) -> Result<Table> {
        let idx = cols.iter().map(|c| self.index_of(c)).collect::<Result<Vec<_>>>()?;
        Ok(Table {
            columns: idx.iter().map(|&i| self.columns[i].clone()).collect(),
            values: self.values.select(Axis(1), &idx),
        })
    }
}

/// Where the independent or dependent variable comes from.
#[derive(Debug, Clone)]
pub enum DataArg {
    Array(ArrayD<f32>),
    /// columns of the accompanying [`Table`]
    Columns(Vec<Column>),
}

impl From<ArrayD<f32>> for DataArg {
    fn from(a: ArrayD<f32>) -> Self {
        DataArg::Array(a)
    }
}

impl From<Array2<f32>> for DataArg {
    fn from(a: Array2<f32>) -> Self {
        DataArg::Array(a.into_dyn())
    }
}

impl From<ndarray::Array1<f32>> for DataArg {
    fn from(a: ndarray::Array1<f32>) -> Self {
        DataArg::Array(a.into_dyn())
    }
}

impl From<Vec<Column>> for DataArg {
    fn from(cols: Vec<Column>) -> Self {
        DataArg::Columns(cols)
    }
}

impl From<&str> for DataArg {
    fn from(name: &str) -> Self {
        DataArg::Columns(vec![Column::from(name)])
    }
}

/// Inputs to `fit`: x and y as arrays, or as columns of a table.
#[derive(Debug, Clone)]
pub struct FitData {
    pub x: DataArg,
    pub y: DataArg,
    pub table: Option<Table>,
    /// names of the columns of an array `x`
    pub x_columns: Vec<String>,
}

impl FitData {
    pub fn from_arrays(x: impl Into<DataArg>, y: impl Into<DataArg>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            table: None,
            x_columns: vec![],
        }
    }

    pub fn from_table(table: Table, x: impl Into<DataArg>, y: impl Into<DataArg>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            table: Some(table),
            x_columns: vec![],
        }
    }

    pub fn with_x_columns(mut self, names: Vec<String>) -> Self {
        self.x_columns = names;
        self
    }
}

/// Plain arrays with samples along the first axis.
#[derive(Debug, Clone)]
pub struct XyData {
    pub x: ArrayD<f32>,
    pub y: ArrayD<f32>,
    pub x_columns: Vec<String>,
}

/// Resolve one variable to an array of rank >= 2 (`[N, ...]`).
///
/// Returns the array and its column names, if known.
pub fn process_data(arg: &DataArg, table: Option<&Table>) -> Result<(ArrayD<f32>, Vec<String>)> {
    let (arr, names) = match arg {
        DataArg::Array(a) => (a.clone(), vec![]),
        DataArg::Columns(cols) => {
            let table = table.ok_or_else(|| {
                VariationalError::InvalidData("columns were given but no table".to_string())
            })?;
            let sub = table.select(cols)?;
            (sub.values.into_dyn(), sub.columns)
        }
    };
    let arr = match arr.ndim() {
        0 => {
            return Err(VariationalError::InvalidData(
                "data must have a sample axis".to_string(),
            ))
        }
        1 => {
            let n = arr.len();
            arr.into_shape_with_order(IxDyn(&[n, 1]))?
        }
        _ => arr,
    };
    Ok((arr, names))
}

pub fn process_xy_data(data: &FitData) -> Result<XyData> {
    let (x, mut x_columns) = process_data(&data.x, data.table.as_ref())?;
    let (y, _) = process_data(&data.y, data.table.as_ref())?;
    if x.shape()[0] != y.shape()[0] {
        return Err(VariationalError::InvalidData(format!(
            "x has {} samples but y has {}",
            x.shape()[0],
            y.shape()[0]
        )));
    }
    if x.shape()[0] == 0 {
        return Err(VariationalError::InvalidData("no samples".to_string()));
    }
    if x_columns.is_empty() {
        x_columns = data.x_columns.clone();
    }
    Ok(XyData { x, y, x_columns })
}

/// Training and validation partitions.
#[derive(Debug, Clone)]
pub struct Split {
    /// number of training samples
    pub n: usize,
    pub x_train: ArrayD<f32>,
    pub y_train: ArrayD<f32>,
    pub x_val: ArrayD<f32>,
    pub y_val: ArrayD<f32>,
}

/// The last `floor(frac * N)` rows (after an optional permutation)
/// become the validation set.
pub fn test_train_split(x: &ArrayD<f32>, y: &ArrayD<f32>, frac: f64, shuffle: bool) -> Result<Split> {
    let ntot = x.shape()[0];
    let mut order = (0..ntot).collect::<Vec<usize>>();
    if shuffle && frac > 0.0 {
        order.shuffle(&mut rand::rng());
    }
    let n_val = ((frac * ntot as f64).floor() as usize).min(ntot);
    let n = ntot - n_val;
    let (train, val) = order.split_at(n);
    Ok(Split {
        n,
        x_train: x.select(Axis(0), train),
        y_train: y.select(Axis(0), train),
        x_val: x.select(Axis(0), val),
        y_val: y.select(Axis(0), val),
    })
}

/// One row permutation per epoch (identity when not shuffling)
pub fn initialize_shuffles(n: usize, epochs: usize, shuffle: bool) -> Vec<Vec<usize>> {
    let mut rng = rand::rng();
    (0..epochs)
        .map(|_| {
            let mut perm = (0..n).collect::<Vec<usize>>();
            if shuffle {
                perm.shuffle(&mut rng);
            }
            perm
        })
        .collect()
}

/// Rows `[b * bs, min((b + 1) * bs, N))` of the epoch's permutation.
///
/// Returns `(x_batch, y_batch, batch_n)`.
pub fn generate_batch(
    x: &ArrayD<f32>,
    y: &ArrayD<f32>,
    epoch: usize,
    batch: usize,
    batch_size: usize,
    shuffles: &[Vec<usize>],
) -> Result<(ArrayD<f32>, ArrayD<f32>, usize)> {
    let perm = shuffles.get(epoch).ok_or_else(|| {
        VariationalError::invalid_value("epoch", format!("{} has no shuffle", epoch))
    })?;
    let lb = batch * batch_size;
    let ub = ((batch + 1) * batch_size).min(perm.len());
    if lb >= ub {
        return Err(VariationalError::invalid_value(
            "batch",
            format!("{} is past the end of {} samples", batch, perm.len()),
        ));
    }
    let rows = &perm[lb..ub];
    Ok((x.select(Axis(0), rows), y.select(Axis(0), rows), rows.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn toy() -> (ArrayD<f32>, ArrayD<f32>) {
        let x = Array1::from_iter((0..10).map(|i| i as f32)).into_dyn();
        let y = x.mapv(|v| 2.0 * v);
        (x, y)
    }

    #[test]
    fn test_process_vectors_become_columns() -> Result<()> {
        let (x, y) = toy();
        let xy = process_xy_data(&FitData::from_arrays(x, y))?;
        assert_eq!(xy.x.shape(), &[10, 1]);
        assert_eq!(xy.y.shape(), &[10, 1]);

        let bad = FitData::from_arrays(array![1f32, 2.0], array![1f32]);
        assert!(process_xy_data(&bad).is_err());
        Ok(())
    }

    #[test]
    fn test_table_columns() -> Result<()> {
        let table = Table::new(
            vec!["a".into(), "b".into(), "y".into()],
            array![[1f32, 2.0, 3.0], [4.0, 5.0, 6.0]],
        )?;
        let data = FitData::from_table(
            table.clone(),
            vec![Column::from("b"), Column::from("a")],
            "y",
        );
        let xy = process_xy_data(&data)?;
        assert_eq!(xy.x_columns, vec!["b", "a"]);
        assert_eq!(xy.x, array![[2f32, 1.0], [5.0, 4.0]].into_dyn());
        assert_eq!(xy.y.shape(), &[2, 1]);

        let missing = FitData::from_table(table, "c", "y");
        let err = process_xy_data(&missing).err();
        assert!(matches!(err, Some(VariationalError::MissingColumn(_))));
        Ok(())
    }

    #[test]
    fn test_split_sizes() -> Result<()> {
        let (x, y) = toy();
        let split = test_train_split(&x, &y, 0.25, false)?;
        assert_eq!(split.n, 8);
        assert_eq!(split.x_val.shape()[0], 2);
        assert_eq!(split.x_val.iter().copied().collect::<Vec<_>>(), vec![8.0, 9.0]);

        let split = test_train_split(&x, &y, 0.0, true)?;
        assert_eq!(split.n, 10);
        assert_eq!(split.x_val.shape()[0], 0);
        Ok(())
    }

    #[test]
    fn test_batches_cover_epoch() -> Result<()> {
        let (x, y) = toy();
        let shuffles = initialize_shuffles(10, 2, true);
        assert_eq!(shuffles.len(), 2);

        let mut seen = vec![];
        for b in 0..3 {
            let (xb, yb, n) = generate_batch(&x, &y, 1, b, 4, &shuffles)?;
            assert_eq!(xb.shape()[0], n);
            for (xv, yv) in xb.iter().zip(yb.iter()) {
                assert_eq!(*yv, 2.0 * xv);
                seen.push(*xv as usize);
            }
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(generate_batch(&x, &y, 0, 3, 4, &shuffles).is_err());

        let fixed = initialize_shuffles(3, 1, false);
        assert_eq!(fixed[0], vec![0, 1, 2]);
        Ok(())
    }
}
