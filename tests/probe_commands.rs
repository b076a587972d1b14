// Probe command surface through the dispatcher

#[cfg(test)]
mod tests {
    use krusty_zprobe::config::Config;
    use krusty_zprobe::dispatcher::Dispatcher;
    use krusty_zprobe::gcode::CommandOutput;
    use krusty_zprobe::probe::ZProbe;
    use krusty_zprobe::scheduler::SlowTicker;
    use krusty_zprobe::simulator::{MachineCommands, SimMachine, SimProbePin, Surface};
    use krusty_zprobe::{Axis, MotionSystem};
    use std::sync::Arc;

    struct Rig {
        machine: Arc<SimMachine>,
        pin: Arc<SimProbePin>,
        dispatcher: Dispatcher,
        _zprobe: ZProbe,
        _ticker: SlowTicker,
    }

    impl Rig {
        async fn run(&self, line: &str) -> (bool, CommandOutput) {
            let mut out = CommandOutput::new();
            let ok = self.dispatcher.dispatch_line(line, &mut out).await;
            (ok, out)
        }
    }

    fn rig_with(kinematics: &str, bed_height: f64) -> Rig {
        let text = format!(
            "[machine]\nkinematics = '{}'\n\n[zprobe]\nenable = true\nprobe_pin = 'P1.28^'\nmax_z = 10.0\n\n[simulator]\nstart = [0.0, 0.0, 10.0]\nbed_height = {:.3}",
            kinematics, bed_height
        );
        let config: Config = toml::from_str(&text).unwrap();
        let machine = Arc::new(SimMachine::new(
            &config.simulator,
            config.machine.forbids_direct_axis_assignment(),
        ));
        let pin = Arc::new(SimProbePin::new(machine.clone()));
        let zprobe = ZProbe::configure(&config, machine.clone(), pin.clone())
            .unwrap()
            .unwrap();
        let mut dispatcher = Dispatcher::new();
        Arc::new(MachineCommands::new(machine.clone())).register(&mut dispatcher);
        zprobe.register(&mut dispatcher);
        let ticker = SlowTicker::new();
        zprobe.start(&ticker);
        Rig {
            machine,
            pin,
            dispatcher,
            _zprobe: zprobe,
            _ticker: ticker,
        }
    }

    fn rig(bed_height: f64) -> Rig {
        rig_with("cartesian", bed_height)
    }

    #[tokio::test(start_paused = true)]
    async fn test_g30_returns_to_start() {
        let rig = rig(6.0);
        let (ok, out) = rig.run("G30 F300").await;
        assert!(ok);
        assert!(out.contains("Z:4.0"), "{:?}", out.lines());
        assert!((rig.machine.actuator_position(Axis::Z) - 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_g30_with_z_sets_position() {
        let rig = rig(6.0);
        let (ok, out) = rig.run("G30 Z0 F300").await;
        assert!(ok);
        assert_eq!(out.lines().len(), 1);
        assert!(out.lines()[0].starts_with("Z:4.0"));
        // Stays at the contact point, which now reads as Z0.
        let z = rig.machine.actuator_position(Axis::Z);
        assert!((z - 6.0).abs() < 0.06, "z = {}", z);
        assert_eq!(rig.machine.work_positions()[2], 0.0);

        let (_, out) = rig.run("M114").await;
        assert_eq!(out.lines(), ["X:0.000 Y:0.000 Z:0.000"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_g30_with_z_on_rotary_delta_returns() {
        let rig = rig_with("rotary_delta", 6.0);
        let (ok, out) = rig.run("G30 Z0 F300").await;
        assert!(ok);
        assert!(out.contains("Z:4.0"));
        assert!((rig.machine.actuator_position(Axis::Z) - 10.0).abs() < 1e-9);
        assert!((rig.machine.work_positions()[2] - 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_g30_not_triggered() {
        let rig = rig(-100.0);
        let (ok, out) = rig.run("G30").await;
        assert!(ok);
        assert_eq!(out.lines(), ["ZProbe not triggered"]);
        assert!((rig.machine.actuator_position(Axis::Z) - 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_family_refuses_when_triggered() {
        let rig = rig(0.0);
        rig.pin.force(true);
        for line in ["G30", "G32", "G38.2 Z-5"] {
            let (ok, out) = rig.run(line).await;
            assert!(!ok, "{} should fail", line);
            assert!(out.contains("ZProbe triggered before move, aborting command."));
        }
        assert_eq!(rig.machine.move_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_straight_probe_miss() {
        let rig = rig(-100.0);
        let (ok, out) = rig.run("G38.2 X20 F600").await;
        assert!(ok);
        assert_eq!(out.lines(), ["[PRB:20.000,0.000,10.000:0]", "ALARM: Probe fail"]);
        assert_eq!(rig.machine.alarm().as_deref(), Some("Probe fail"));

        // Halted until cleared.
        let (ok, out) = rig.run("G38.3 X-5").await;
        assert!(!ok);
        assert!(out.contains("halted"));
        rig.run("M999").await;
        let (ok, out) = rig.run("G38.3 X-5").await;
        assert!(ok);
        assert_eq!(out.lines(), ["[PRB:15.000,0.000,10.000:0]"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relaxed_straight_probe_contact() {
        let rig = rig(-100.0);
        rig.machine.set_surface(Surface {
            bed_height: -100.0,
            wall_x: Some(12.0),
            ..Surface::default()
        });
        let (ok, out) = rig.run("G38.3 X20 F600").await;
        assert!(ok);
        assert_eq!(out.lines().len(), 1);
        assert!(out.lines()[0].starts_with("[PRB:"), "{:?}", out.lines());
        assert!(out.lines()[0].ends_with(",0.000,10.000:1]"));
        let last = rig.machine.last_probe_result().unwrap();
        assert!(last.triggered);
        assert!((last.position[0] - 12.0).abs() < 0.15);
        assert!(rig.machine.alarm().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_straight_probe_argument_errors() {
        let rig = rig(-100.0);
        let (ok, out) = rig.run("G38.2 X5 Y5").await;
        assert!(!ok);
        assert!(out.contains("exactly one of X Y or Z"));

        let (ok, out) = rig.run("G38.2").await;
        assert!(!ok);
        assert!(out.contains("exactly one of X Y or Z"));

        let (ok, out) = rig.run("G38.4 X5").await;
        assert!(!ok);
        assert!(out.contains("Only G38.2 and G38.3"));
        assert_eq!(rig.machine.move_count(), 0);
        assert!(rig.machine.alarm().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_selection_errors() {
        let rig = rig(0.0);
        let (ok, out) = rig.run("G32 P0").await;
        assert!(!ok);
        assert!(out.contains("strategy #0 not available"));

        let (ok, out) = rig.run("G31 P1").await;
        assert!(!ok);
        assert!(out.contains("strategy #1 not available"));

        let (ok, out) = rig.run("G29").await;
        assert!(!ok);
        assert!(out.contains("No strategy found to handle G29"));

        let (ok, out) = rig.run("G32 P2").await;
        assert!(!ok);
        assert!(out.contains("Only P0 and P1 supported"));

        assert!(rig.machine.alarm().is_none());
        assert_eq!(rig.machine.move_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameters_round_trip() {
        let rig = rig(0.0);
        let (ok, _) = rig.run("M670 S2 K50 R8 Z20 H3 D0.5").await;
        assert!(ok);
        let (_, saved) = rig.run("M500").await;
        assert_eq!(
            saved.lines(),
            [
                ";Probe feedrates Slow/fast(K)/Return (mm/sec) max_z (mm) height (mm) dwell (s):",
                "M670 S2.00 K50.00 R8.00 Z20.00 H3.00 D0.50",
            ]
        );

        // Unspecified values are left alone; bad ones change nothing.
        rig.run("M670 S4").await;
        let (ok, out) = rig.run("M670 K0 S9").await;
        assert!(!ok);
        assert!(out.contains("invalid argument K"));
        let (_, saved) = rig.run("M500").await;
        assert_eq!(saved.lines()[1], "M670 S4.00 K50.00 R8.00 Z20.00 H3.00 D0.50");

        // Replaying the saved line is a no-op.
        rig.run(&saved.lines()[1].clone()).await;
        let (_, again) = rig.run("M500").await;
        assert_eq!(again.lines(), saved.lines());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_feedrate_rejected_without_panic() {
        let rig = rig(-100.0);
        let (ok, out) = rig.run("G38.3 X10 F0.0000000000000000000001").await;
        assert!(!ok);
        assert!(out.contains("move rejected"), "{:?}", out.lines());
        assert!(!rig.machine.last_probe_result().unwrap().triggered);
        assert_eq!(rig.machine.move_count(), 0);
        assert!(rig.machine.segmentation_enabled());
        assert!(rig.machine.is_absolute());

        let (ok, _) = rig.run("M670 S0.00000000000000000000001").await;
        assert!(ok);
        let (ok, out) = rig.run("G30").await;
        assert!(!ok);
        assert!(out.contains("move rejected"));
        assert_eq!(rig.machine.move_count(), 0);

        // Nothing left armed: a sane feedrate works again.
        rig.run("M670 S5").await;
        let (ok, out) = rig.run("G30 F300").await;
        assert!(ok);
        assert_eq!(out.lines(), ["ZProbe not triggered"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflowing_numbers_rejected() {
        let rig = rig(-100.0);
        let huge = "9".repeat(400);

        let (ok, out) = rig.run(&format!("G38.3 X10 F{}", huge)).await;
        assert!(!ok);
        assert!(out.contains("invalid argument F"));

        let (ok, out) = rig.run(&format!("G38.3 X{}", huge)).await;
        assert!(!ok);
        assert!(out.contains("move rejected"));

        for letter in ['S', 'K', 'Z', 'H'] {
            let (ok, out) = rig.run(&format!("M670 {}{}", letter, huge)).await;
            assert!(!ok, "M670 {} accepted", letter);
            assert!(out.contains(&format!("invalid argument {}", letter)));
        }
        let (_, saved) = rig.run("M500").await;
        assert_eq!(saved.lines()[1], "M670 S5.00 K100.00 R0.00 Z10.00 H5.00 D0.00");

        // Finite, but longer than any sleep.
        let (ok, _) = rig.run(&format!("M670 D1{}", "0".repeat(30))).await;
        assert!(ok);
        let (ok, out) = rig.run("G30").await;
        assert!(!ok);
        assert!(out.contains("dwell"), "{:?}", out.lines());
        assert!(!rig.machine.last_probe_result().unwrap().triggered);
        assert_eq!(rig.machine.move_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_m119_and_inversion_override() {
        let rig = rig(0.0);
        let (_, out) = rig.run("M119").await;
        assert_eq!(out.lines(), [" Probe: 0"]);

        rig.pin.force(true);
        let (_, out) = rig.run("M119").await;
        assert_eq!(out.lines(), [" Probe: 1"]);

        rig.run("M670 I1").await;
        let (_, out) = rig.run("M119").await;
        assert_eq!(out.lines(), [" Probe: 0"]);

        rig.run("M670 I0").await;
        let (_, out) = rig.run("M119").await;
        assert_eq!(out.lines(), [" Probe: 0"]);

        rig.run("M670 I1").await;
        let (_, out) = rig.run("M119").await;
        assert_eq!(out.lines(), [" Probe: 1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_g30_reverse_moves_upwards() {
        let rig = rig(-100.0);
        rig.run("M670 Z2").await;
        let (ok, out) = rig.run("G30 R1").await;
        assert!(ok);
        assert_eq!(out.lines(), ["ZProbe not triggered"]);
        let last = rig.machine.last_probe_result().unwrap();
        assert!((last.position[2] + 4.0).abs() < 1e-9);
        assert!((rig.machine.actuator_position(Axis::Z) - 10.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_travel_limits_default_probe() {
        let rig = rig(-100.0);
        rig.run("M670 Z2").await;
        let (ok, out) = rig.run("G30").await;
        assert!(ok);
        assert_eq!(out.lines(), ["ZProbe not triggered"]);
        // Twice the max travel, then back.
        let last = rig.machine.last_probe_result().unwrap();
        assert!((last.position[2] - 4.0).abs() < 1e-9);
        assert!((rig.machine.actuator_position(Axis::Z) - 10.0).abs() < 1e-9);
    }
}
