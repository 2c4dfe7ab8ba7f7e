//! Default unsolicited result code handlers of the modem service.
//!
//! Each handler turns one URC into a service signal published through the
//! resource's [`SignalGate`].

use super::ModemState;
use crate::channel::ChannelHandle;
use crate::event::{Event, EventDispatcher};
use crate::protocol::command::split_values;
use crate::resource::SignalGate;
use crate::unsolicited::{Unsolicited, UrcRegistry};

/// Names of the `+CREG` registration states.
const REGISTER_STATUS: [&str; 6] = ["unregistered", "home", "busy", "denied", "unknown", "roaming"];

fn register_status(value: &str) -> &'static str {
    value
        .parse::<usize>()
        .ok()
        .and_then(|index| REGISTER_STATUS.get(index).copied())
        .unwrap_or("unknown")
}

/// Converts an `+CSQ` RSSI value (0..=31, 99 = unknown) to percent.
fn signal_percentage(rssi: &str) -> u32 {
    match rssi.parse::<u32>() {
        Ok(rssi @ 0..=31) => rssi * 100 / 31,
        _ => 0,
    }
}

/// Splits the value list after the colon, keeping quoted fields intact.
fn value_list(urc: &Unsolicited) -> Vec<String> {
    split_values(urc.header().split_once(':').map_or("", |(_, values)| values))
}

/// Builds the registry with the default handlers.
///
/// `channel` is the line the registry is attached to; `+CPIN: READY` sends
/// the SIM command set on it.
pub(crate) fn default_registry(
    gate: &SignalGate,
    events: &EventDispatcher,
    channel: &ChannelHandle,
    state: &ModemState,
) -> UrcRegistry {
    let creg = gate.clone();
    let csq = gate.clone();
    let cpin = gate.clone();
    let cmti = gate.clone();
    let cmt = gate.clone();
    let cbm = gate.clone();
    let ring = gate.clone();
    let cring = gate.clone();
    let events = events.clone();
    let channel = channel.clone();
    let state = state.clone();

    UrcRegistry::new()
        .on("+CREG", move |urc| {
            // +CREG: <stat>[,<lac>,<ci>]
            let mut values = value_list(urc).into_iter();
            let Some(stat) = values.next() else { return };
            let mut args = vec![register_status(&stat).to_owned()];
            args.extend(values);
            creg.emit_queued(Event::signal("Status", args));
        })
        .on("+CSQ", move |urc| {
            let values = value_list(urc);
            let Some(rssi) = values.first() else { return };
            csq.emit_queued(Event::signal(
                "SignalStrength",
                [signal_percentage(rssi).to_string()],
            ));
        })
        .on("+CPIN", move |urc| {
            let status = urc.right_hand_side();
            state.set_sim_pin_state(&channel, status);
            cpin.emit_queued(Event::signal("AuthStatus", [status]));
        })
        .on("+CMTI", move |urc| {
            // +CMTI: "SM",3
            cmti.emit_queued(Event::signal("IncomingStoredMessage", value_list(urc)));
        })
        .on("+CMT", move |urc| emit_pdu(&cmt, "IncomingMessage", urc))
        .on("+CBM", move |urc| emit_pdu(&cbm, "IncomingCellBroadcast", urc))
        .on("RING", move |_| {
            ring.emit_checked(Event::signal("CallStatus", ["incoming"]));
        })
        .on("+CRING", move |urc| {
            cring.emit_checked(Event::signal(
                "CallStatus",
                ["incoming", urc.right_hand_side()],
            ));
        })
        .fallback(move |urc| events.dispatch(Event::Unsolicited(urc.clone())))
}

fn emit_pdu(gate: &SignalGate, signal: &str, urc: &Unsolicited) {
    match urc.pdu_bytes() {
        Ok(Some(_)) => {
            let pdu = urc.pdu().unwrap_or_default().trim();
            gate.emit_queued(Event::signal(signal, [pdu]));
        }
        Ok(None) => tracing::warn!("{} without PDU line: {:?}", urc.prefix(), urc.lines()),
        Err(e) => tracing::warn!("{}: {}", urc.prefix(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, CommandChannel};
    use crate::event::Subscription;
    use crate::modem::CommandSets;
    use crate::resource::{NoHooks, ResourceLifecycle};
    use crate::transport::mock::MockTransport;
    use crate::unsolicited::IgnoreUnsolicited;

    /// A registry on a channel that is never opened.
    fn attached_registry(
        resource: &ResourceLifecycle,
        events: &EventDispatcher,
    ) -> (UrcRegistry, CommandChannel) {
        let (transport, _modem) = MockTransport::ok();
        let channel = CommandChannel::new(
            ChannelConfig::new("misc"),
            transport,
            IgnoreUnsolicited,
            events.clone(),
        );
        let state = ModemState::new(CommandSets::default());
        let registry = default_registry(&resource.gate(), events, &channel.handle(), &state);
        (registry, channel)
    }

    fn urc(lines: &[&str]) -> Unsolicited {
        Unsolicited::new(lines.iter().map(|&l| l.to_owned()).collect())
    }

    fn signals(sub: &mut Subscription) -> Vec<Event> {
        std::iter::from_fn(|| sub.try_recv())
            .filter(|e| matches!(e, Event::Signal { .. } | Event::Unsolicited(_)))
            .collect()
    }

    #[test]
    fn test_helpers() {
        assert_eq!(register_status("5"), "roaming");
        assert_eq!(register_status("9"), "unknown");
        assert_eq!(signal_percentage("31"), 100);
        assert_eq!(signal_percentage("99"), 0);
    }

    #[tokio::test]
    async fn test_default_handlers_publish_signals() {
        let events = EventDispatcher::default();
        let resource = ResourceLifecycle::new("GSM", NoHooks, events.clone());
        let (mut registry, _channel) = attached_registry(&resource, &events);
        resource.enable().await.unwrap();
        let mut sub = events.subscribe();

        registry.dispatch(&urc(&["+CREG: 1,\"000F\",\"032F\""]));
        registry.dispatch(&urc(&["+CSQ: 31,99"]));
        registry.dispatch(&urc(&["+CMTI: \"SM\",3"]));
        registry.dispatch(&urc(&["+CMT: ,22", "0791947106004034"]));
        registry.dispatch(&urc(&["+CRING: VOICE"]));
        registry.dispatch(&urc(&["%CSTAT: PHB,1"]));

        assert_eq!(
            signals(&mut sub),
            [
                Event::signal("Status", ["home", "000F", "032F"]),
                Event::signal("SignalStrength", ["100"]),
                Event::signal("IncomingStoredMessage", ["SM", "3"]),
                Event::signal("IncomingMessage", ["0791947106004034"]),
                Event::signal("CallStatus", ["incoming", "VOICE"]),
                Event::Unsolicited(urc(&["%CSTAT: PHB,1"])),
            ]
        );
    }

    #[tokio::test]
    async fn test_ring_dropped_while_disabled() {
        let events = EventDispatcher::default();
        let resource = ResourceLifecycle::new("GSM", NoHooks, events.clone());
        let (mut registry, _channel) = attached_registry(&resource, &events);
        let mut sub = events.subscribe();

        registry.dispatch(&urc(&["RING"]));
        registry.dispatch(&urc(&["+CPIN: SIM PIN"]));
        assert!(signals(&mut sub).is_empty());

        resource.enable().await.unwrap();
        assert_eq!(
            signals(&mut sub),
            [Event::signal("AuthStatus", ["SIM PIN"])]
        );
    }
}
