use rand::Rng;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix{
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<Vec<f64>>
}

impl Matrix{
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix{
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows]
        }
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    /// Both u1 and u2 must be uniform on (0, 1].
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // Draw two independent uniform samples in (0, 1] to avoid log(0).
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn normal<R: Rng + ?Sized>(rows: usize, cols: usize, std_dev: f64, rng: &mut R) -> Matrix {
        let mut res = Matrix::zeros(rows, cols);
        for row in res.data.iter_mut() {
            for x in row.iter_mut() {
                *x = Matrix::sample_standard_normal(rng) * std_dev;
            }
        }
        res
    }

    /// He initialization: samples from N(0, sqrt(2 / rows)).
    ///
    /// Recommended before ReLU layers. Weights are stored as (fan_in, fan_out),
    /// so `rows` is the number of input connections.
    pub fn he<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        Matrix::normal(rows, cols, (2.0 / rows as f64).sqrt(), rng)
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(1 / rows)).
    ///
    /// Recommended before Sigmoid/Tanh/Softmax layers.
    pub fn xavier<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        Matrix::normal(rows, cols, (1.0 / rows as f64).sqrt(), rng)
    }

    pub fn from_data(data: Vec<Vec<f64>>) -> Matrix {
        Matrix {
            rows: data.len(),
            cols: data.first().map_or(0, |row| row.len()),
            data
        }
    }

    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);

        for i in 0..res.rows {
            for j in 0..res.cols {
                res.data[i][j] = self.data[j][i];
            }
        }

        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix::from_data(
            self.data
                .iter()
                .map(|row| row.iter().map(|&x| functor(x)).collect())
                .collect()
        )
    }

    /// Matrix product `self · rhs`.
    ///
    /// Panics if the inner dimensions disagree.
    pub fn matmul(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.cols, rhs.rows, "Matrices are of incorrect sizes");
        let data = self.data.iter().map(|row| mul_row(row, rhs)).collect();
        Matrix { rows: self.rows, cols: rhs.cols, data }
    }

    /// Same as [`Matrix::matmul`] with output rows computed on the rayon pool.
    /// Each row is produced by the same arithmetic as the serial path.
    pub fn par_matmul(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.cols, rhs.rows, "Matrices are of incorrect sizes");
        let data = self.data.par_iter().map(|row| mul_row(row, rhs)).collect();
        Matrix { rows: self.rows, cols: rhs.cols, data }
    }

    /// Adds a (1 × cols) row vector to every row.
    pub fn add_row(&self, row: &Matrix) -> Matrix {
        assert_eq!(row.rows, 1);
        assert_eq!(row.cols, self.cols, "Matrices are of incorrect sizes");
        Matrix::from_data(
            self.data
                .iter()
                .map(|r| r.iter().zip(row.data[0].iter()).map(|(a, b)| a + b).collect())
                .collect()
        )
    }

    /// Sums every column into a (1 × cols) row vector.
    pub fn column_sums(&self) -> Matrix {
        let mut sums = vec![0.0; self.cols];
        for row in &self.data {
            for (s, x) in sums.iter_mut().zip(row.iter()) {
                *s += x;
            }
        }
        Matrix { rows: 1, cols: self.cols, data: vec![sums] }
    }

    /// Element-wise (Hadamard) product of two same-shape matrices.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        assert!(self.same_shape(other), "Matrices are of incorrect sizes");
        Matrix::from_data(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a.iter().zip(b.iter()).map(|(x, y)| x * y).collect())
                .collect()
        )
    }

    /// In-place `self += other`.
    pub fn add_assign(&mut self, other: &Matrix) {
        assert!(self.same_shape(other), "Matrices are of incorrect sizes");
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += y;
            }
        }
    }

    /// Stacks matrices with equal column counts on top of each other.
    pub fn vstack(parts: &[Matrix]) -> Matrix {
        let cols = parts.first().map_or(0, |m| m.cols);
        let mut data = Vec::with_capacity(parts.iter().map(|m| m.rows).sum());
        for part in parts {
            assert_eq!(part.cols, cols, "Matrices are of incorrect sizes");
            data.extend(part.data.iter().cloned());
        }
        Matrix { rows: data.len(), cols, data }
    }

    /// Concatenates `other`'s columns after this matrix's columns.
    pub fn hstack(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.rows, other.rows, "Matrices are of incorrect sizes");
        let data = self.data.iter().zip(other.data.iter())
            .map(|(a, b)| a.iter().chain(b.iter()).copied().collect())
            .collect();
        Matrix { rows: self.rows, cols: self.cols + other.cols, data }
    }

    /// Copies rows `start..end` into a new matrix.
    pub fn row_slice(&self, start: usize, end: usize) -> Matrix {
        Matrix { rows: end - start, cols: self.cols, data: self.data[start..end].to_vec() }
    }

    /// Copies columns `start..end` into a new matrix.
    pub fn col_slice(&self, start: usize, end: usize) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: end - start,
            data: self.data.iter().map(|row| row[start..end].to_vec()).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.data.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.data.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn mul_row(row: &[f64], rhs: &Matrix) -> Vec<f64> {
    let mut out = vec![0.0; rhs.cols];
    for (k, &a) in row.iter().enumerate() {
        if a == 0.0 {
            continue;
        }
        for (o, &b) in out.iter_mut().zip(rhs.data[k].iter()) {
            *o += a * b;
        }
    }
    out
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}
