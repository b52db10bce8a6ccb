use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::dataset::InMemoryDataset;
use crate::volume::{LabelVolume, Sample, Volume, VolumeShape};

/// Generates `count` phantom volumes of `shape`, each holding one ellipsoid
/// "organ" per class `1..num_classes` on a noisy background.
///
/// Organ `c` has a characteristic brightness so that a voxel classifier can
/// separate the classes. Deterministic for a given `seed`.
pub fn phantom_dataset(count: usize, shape: VolumeShape, num_classes: usize, seed: u64) -> InMemoryDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = (0..count)
        .map(|_| phantom(shape, num_classes, &mut rng))
        .collect();
    InMemoryDataset::new(samples)
}

fn phantom(shape: VolumeShape, num_classes: usize, rng: &mut StdRng) -> Sample {
    let organs = num_classes.saturating_sub(1);
    let mut data: Vec<f64> = (0..shape.voxels()).map(|_| rng.gen_range(0.0..0.1)).collect();
    let mut labels = vec![0u8; shape.voxels()];

    for organ in 1..=organs {
        // Centres sit on the voxel grid's span and radii are at least one
        // voxel, so every organ covers its nearest voxel.
        let centre = [
            rng.gen::<f64>() * shape.depth.saturating_sub(1) as f64,
            rng.gen::<f64>() * shape.height.saturating_sub(1) as f64,
            rng.gen::<f64>() * shape.width.saturating_sub(1) as f64,
        ];
        let radius = [
            (shape.depth as f64 / 4.0).max(1.0),
            (shape.height as f64 / 4.0).max(1.0),
            (shape.width as f64 / 4.0).max(1.0),
        ];
        let brightness = 0.2 + 0.8 * organ as f64 / organs as f64;

        for z in 0..shape.depth {
            for y in 0..shape.height {
                for x in 0..shape.width {
                    let d = [z as f64, y as f64, x as f64]
                        .iter()
                        .zip(centre.iter().zip(radius.iter()))
                        .map(|(p, (c, r))| ((p - c) / r).powi(2))
                        .sum::<f64>();
                    if d <= 1.0 {
                        let i = shape.index(z, y, x);
                        labels[i] = organ as u8;
                        data[i] = (brightness + rng.gen_range(-0.05..0.05)).clamp(0.0, 1.0);
                    }
                }
            }
        }
    }

    // Shapes agree by construction.
    Sample {
        volume: Volume { shape, data },
        label: LabelVolume { shape, labels },
    }
}
