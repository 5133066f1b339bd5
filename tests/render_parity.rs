#[cfg(feature = "gpu")]
mod parity {
    use cogtile::render_gpu::GpuBackend;
    use cogtile::{
        BandScope, BandWindow, Operation, Pipeline, PipelineStep, SampleBuffer, TileBands,
        TileRgba,
    };

    fn gpu_or_skip() -> Option<GpuBackend> {
        match GpuBackend::probe() {
            Ok(backend) => Some(backend),
            Err(e) if e.to_string().contains("no gpu adapter available") => None,
            Err(e) => panic!("unexpected gpu probe error: {e}"),
        }
    }

    fn assert_close(cpu: &TileRgba, gpu: &TileRgba) {
        assert_eq!((cpu.width, cpu.height), (gpu.width, gpu.height));
        assert_eq!(cpu.data.len(), gpu.data.len());
        for (i, (a, b)) in cpu.data.iter().zip(gpu.data.iter()).enumerate() {
            if i % 4 == 3 {
                assert_eq!(a, b, "alpha diverges at byte {i}");
            } else {
                assert!(
                    a.abs_diff(*b) <= 1,
                    "channel byte {i} diverges: cpu {a} vs gpu {b}"
                );
            }
        }
    }

    fn gradient_bands() -> TileBands {
        let w = 16u32;
        let h = 16u32;
        let band = |offset: u16| {
            let samples: Vec<u8> = (0..w * h)
                .map(|i| ((i as u16 * 7 + offset) % 256) as u8)
                .collect();
            BandWindow::new(w, h, SampleBuffer::U8(samples))
        };
        TileBands::Separate {
            red: band(0),
            green: band(85),
            blue: band(170),
        }
    }

    fn stretch_pipeline() -> Pipeline {
        Pipeline::new(vec![
            PipelineStep::new(
                Operation::SigmoidalContrast {
                    contrast: 50.0,
                    bias: 0.16,
                },
                BandScope::All,
            ),
            PipelineStep::new(Operation::Gamma { value: 1.03 }, BandScope::Red),
            PipelineStep::new(Operation::Gamma { value: 0.925 }, BandScope::Blue),
        ])
    }

    #[test]
    fn stretch_pipeline_matches_cpu() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let bands = gradient_bands();
        let pipeline = stretch_pipeline();

        let cpu_tile = cogtile::render_cpu::CpuBackend::new()
            .render_tile(&pipeline, &bands)
            .unwrap();
        let gpu_tile = gpu.render_tile(&pipeline, &bands).unwrap();
        assert_close(&cpu_tile, &gpu_tile);
    }

    #[test]
    fn empty_pipeline_matches_cpu() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let bands = gradient_bands();
        let pipeline = Pipeline::default();

        let cpu_tile = cogtile::render_cpu::CpuBackend::new()
            .render_tile(&pipeline, &bands)
            .unwrap();
        let gpu_tile = gpu.render_tile(&pipeline, &bands).unwrap();
        assert_close(&cpu_tile, &gpu_tile);
    }

    #[test]
    fn linear_stretch_on_u16_bands_matches_cpu() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let band = |scale: u16| {
            let samples: Vec<u16> = (0..64u16).map(|i| i * scale).collect();
            BandWindow::new(8, 8, SampleBuffer::U16(samples)).with_declared_max(4000.0)
        };
        let bands = TileBands::Separate {
            red: band(60),
            green: band(45),
            blue: band(30),
        };
        let pipeline = Pipeline::new(vec![PipelineStep::new(
            Operation::Linear {
                min: 300.0,
                max: 3500.0,
                stat_min: 0.0,
                stat_max: 4000.0,
            },
            BandScope::All,
        )]);

        let cpu_tile = cogtile::render_cpu::CpuBackend::new()
            .render_tile(&pipeline, &bands)
            .unwrap();
        let gpu_tile = gpu.render_tile(&pipeline, &bands).unwrap();
        assert_close(&cpu_tile, &gpu_tile);
    }

    #[test]
    fn bands_with_different_scales_match_cpu() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let bands = TileBands::Separate {
            red: BandWindow::new(
                4,
                4,
                SampleBuffer::U8((0..16u8).map(|i| i * 16).collect()),
            ),
            green: BandWindow::new(
                4,
                4,
                SampleBuffer::U16((0..16u16).map(|i| i * 250).collect()),
            )
            .with_declared_max(4000.0),
            blue: BandWindow::new(
                4,
                4,
                SampleBuffer::U8((0..16u8).map(|i| 240 - i * 15).collect()),
            ),
        };
        // The stretch bounds mean green source units; red and blue only see
        // the gamma step.
        let pipeline = Pipeline::new(vec![
            PipelineStep::new(
                Operation::Linear {
                    min: 300.0,
                    max: 3500.0,
                    stat_min: 0.0,
                    stat_max: 4000.0,
                },
                BandScope::Green,
            ),
            PipelineStep::new(Operation::Gamma { value: 1.1 }, BandScope::All),
        ]);

        let cpu_tile = cogtile::render_cpu::CpuBackend::new()
            .render_tile(&pipeline, &bands)
            .unwrap();
        let gpu_tile = gpu.render_tile(&pipeline, &bands).unwrap();
        assert_close(&cpu_tile, &gpu_tile);
    }

    #[test]
    fn interleaved_rgb_with_declared_max_matches_cpu() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let samples: Vec<u8> = (0..4 * 4 * 3u32).map(|i| (i * 13 % 200) as u8).collect();
        let bands = TileBands::Interleaved(
            BandWindow::new(4, 4, SampleBuffer::U8(samples)).with_declared_max(200.0),
        );
        let pipeline = stretch_pipeline();

        let cpu_tile = cogtile::render_cpu::CpuBackend::new()
            .render_tile(&pipeline, &bands)
            .unwrap();
        let gpu_tile = gpu.render_tile(&pipeline, &bands).unwrap();
        assert_close(&cpu_tile, &gpu_tile);
    }

    #[test]
    fn interleaved_rgb_matches_cpu() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let samples: Vec<u8> = (0..4 * 4 * 3u32).map(|i| (i * 11 % 256) as u8).collect();
        let bands = TileBands::Interleaved(BandWindow::new(4, 4, SampleBuffer::U8(samples)));
        let pipeline = stretch_pipeline();

        let cpu_tile = cogtile::render_cpu::CpuBackend::new()
            .render_tile(&pipeline, &bands)
            .unwrap();
        let gpu_tile = gpu.render_tile(&pipeline, &bands).unwrap();
        assert_close(&cpu_tile, &gpu_tile);
    }

    #[test]
    fn no_data_pixels_are_transparent_on_both_backends() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let band = |v: u8| BandWindow::new(2, 1, SampleBuffer::U8(vec![0, v]));
        let bands = TileBands::Separate {
            red: band(120),
            green: band(130),
            blue: band(140),
        };
        let pipeline = Pipeline::default();

        let cpu_tile = cogtile::render_cpu::CpuBackend::new()
            .render_tile(&pipeline, &bands)
            .unwrap();
        let gpu_tile = gpu.render_tile(&pipeline, &bands).unwrap();
        assert_eq!(cpu_tile.pixel(0, 0), [0, 0, 0, 0]);
        assert_eq!(gpu_tile.pixel(0, 0), [0, 0, 0, 0]);
        assert_close(&cpu_tile, &gpu_tile);
    }

    #[test]
    fn parameter_edits_reuse_the_compiled_program() {
        let Some(mut gpu) = gpu_or_skip() else { return };
        let bands = gradient_bands();

        let gamma = |value: f32| {
            Pipeline::new(vec![PipelineStep::new(
                Operation::Gamma { value },
                BandScope::All,
            )])
        };
        gpu.render_tile(&gamma(1.0), &bands).unwrap();
        gpu.render_tile(&gamma(2.2), &bands).unwrap();
        assert_eq!(gpu.program_count(), 1);

        // A rescoped step changes the signature and compiles a new program.
        let scoped = Pipeline::new(vec![PipelineStep::new(
            Operation::Gamma { value: 2.2 },
            BandScope::Red,
        )]);
        gpu.render_tile(&scoped, &bands).unwrap();
        assert_eq!(gpu.program_count(), 2);
    }
}
