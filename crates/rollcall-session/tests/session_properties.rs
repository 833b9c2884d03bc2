//! Property tests for session transitions and subsystem exclusivity.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use rollcall_core::{ControlAction, SessionState};
use rollcall_session::state_machine::{MAX_HISTORY_SIZE, armed_subsystem, target_state};
use rollcall_session::{Armable, EventBus, SessionController, StateMachine, Subsystem};

#[derive(Debug, Default)]
struct Armed {
    card_reader: bool,
    capture: bool,
    overlaps: u32,
}

struct Fake {
    subsystem: Subsystem,
    armed: Arc<Mutex<Armed>>,
    generation: u64,
}

impl Fake {
    fn flag(armed: &mut Armed, subsystem: Subsystem) -> &mut bool {
        match subsystem {
            Subsystem::CardReader => &mut armed.card_reader,
            Subsystem::Capture => &mut armed.capture,
        }
    }
}

impl Armable for Fake {
    fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    fn is_armed(&self) -> bool {
        *Self::flag(&mut self.armed.lock().unwrap(), self.subsystem)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn arm(&mut self) {
        let mut armed = self.armed.lock().unwrap();
        if *Self::flag(&mut armed, self.subsystem) {
            return;
        }
        *Self::flag(&mut armed, self.subsystem) = true;
        if armed.card_reader && armed.capture {
            armed.overlaps += 1;
        }
        self.generation += 1;
    }

    async fn disarm(&mut self) {
        tokio::task::yield_now().await;
        *Self::flag(&mut self.armed.lock().unwrap(), self.subsystem) = false;
    }
}

fn action() -> impl Strategy<Value = ControlAction> {
    prop_oneof![
        Just(ControlAction::StartCheckIn),
        Just(ControlAction::StartCheckOut),
        Just(ControlAction::EndCheckIn),
        Just(ControlAction::EndCheckOut),
        Just(ControlAction::Unknown),
    ]
}

proptest! {
    #[test]
    fn transitions_fold_left_to_right(actions in prop::collection::vec(action(), 0..150)) {
        let mut machine = StateMachine::new();
        let mut expected = SessionState::Idle;
        for action in &actions {
            let transition = machine.on_control(*action);
            prop_assert_eq!(transition.from, expected);
            expected = target_state(*action);
            prop_assert_eq!(transition.to, expected);
        }

        prop_assert_eq!(machine.current_state(), expected);
        prop_assert_eq!(machine.history().len(), actions.len().min(MAX_HISTORY_SIZE));
        if let Some(last) = machine.history().back() {
            prop_assert_eq!(last.action(), actions.last().copied());
        }
    }

    #[test]
    fn at_most_one_subsystem_is_armed(actions in prop::collection::vec(action(), 1..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let armed = Arc::new(Mutex::new(Armed::default()));
        let fake = |subsystem| Fake {
            subsystem,
            armed: Arc::clone(&armed),
            generation: 0,
        };
        let mut controller = SessionController::new(
            fake(Subsystem::CardReader),
            fake(Subsystem::Capture),
            EventBus::new(),
        );

        runtime.block_on(async {
            for action in &actions {
                let transition = controller.apply(*action).await;
                let want = armed_subsystem(transition.to);
                assert_eq!(controller.card_reader().is_armed(), want == Some(Subsystem::CardReader));
                assert_eq!(controller.capture().is_armed(), want == Some(Subsystem::Capture));
            }
            controller.shutdown().await;
        });

        let armed = armed.lock().unwrap();
        prop_assert_eq!(armed.overlaps, 0);
        prop_assert!(!armed.card_reader && !armed.capture);
    }
}
