#[cfg(test)]
mod tests_impl {
    use crate::backend::MemoryBackend;
    use crate::config::AppConfig;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::rules::analyze::ProtectTarget;
    use crate::core::services::PROTO_TCP;
    use crate::core::session::Session;
    use crate::core::test_helpers::{seeded_backend, session_with};
    use crate::core::zones::ZoneKind;

    fn empty_session() -> Session {
        let mut session =
            Session::with_backend(AppConfig::default(), Box::new(MemoryBackend::new())).unwrap();
        session.init_storage().unwrap();
        session
    }

    fn zone_names(session: &Session) -> Vec<String> {
        session.zones().iter().map(|(_, z)| z.name.clone()).collect()
    }

    #[test]
    fn test_zone_order_mirrors_scopes() {
        let mut session = empty_session();
        session.new_zone("b", ZoneKind::Zone).unwrap();
        session.new_zone("x.b", ZoneKind::Network).unwrap();
        session.new_zone("h2.x.b", ZoneKind::Host).unwrap();
        session.new_zone("h1.x.b", ZoneKind::Host).unwrap();
        session.new_zone("a", ZoneKind::Zone).unwrap();
        assert_eq!(zone_names(&session), ["a", "b", "x.b", "h1.x.b", "h2.x.b"]);

        // same order after a reload from the backend
        session.load().unwrap();
        assert_eq!(zone_names(&session), ["a", "b", "x.b", "h1.x.b", "h2.x.b"]);
    }

    #[test]
    fn test_rule_numbering_survives_reload() {
        let mut session = empty_session();
        session.new_zone("lan", ZoneKind::Zone).unwrap();
        session.new_service("ssh").unwrap();
        for line in [
            "accept service ssh from lan to firewall",
            "drop service any from lan to firewall",
            "reject service ssh from any to lan",
        ] {
            session.insert_rule(u32::MAX, line).unwrap();
        }
        assert_eq!(
            session.insert_rule(2, "log service any from lan to firewall").unwrap(),
            2
        );
        session.remove_rule(1).unwrap();

        let before = session.rules().to_lines();
        assert_eq!(
            before,
            [
                "log service any from lan to firewall",
                "drop service any from lan to firewall",
                "reject service ssh from any to lan",
            ]
        );
        session.load().unwrap();
        assert_eq!(session.rules().to_lines(), before);
        let numbers: Vec<u32> = session.rules().iter().map(|r| r.number).collect();
        assert_eq!(numbers, [1, 2, 3]);
    }

    #[test]
    fn test_group_member_blocks_host_delete() {
        let mut session = empty_session();
        session.new_zone("dmz", ZoneKind::Zone).unwrap();
        session.new_zone("web.dmz", ZoneKind::Network).unwrap();
        session.new_zone("www.web.dmz", ZoneKind::Host).unwrap();
        session.new_zone("all.web.dmz", ZoneKind::Group).unwrap();
        session.add_group_member("all.web.dmz", "www").unwrap();

        let err = session.delete_zone("www.web.dmz", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferentialIntegrity);
        assert!(session.zones().search("www.web.dmz").is_some());
        assert!(session.zones().search("all.web.dmz").is_some());

        session.remove_group_member("all.web.dmz", "www.web.dmz").unwrap();
        session.delete_zone("www.web.dmz", false).unwrap();
        assert!(session.zones().search("www.web.dmz").is_none());
    }

    #[test]
    fn test_group_member_must_share_network() {
        let mut session = empty_session();
        session.new_zone("dmz", ZoneKind::Zone).unwrap();
        session.new_zone("a.dmz", ZoneKind::Network).unwrap();
        session.new_zone("b.dmz", ZoneKind::Network).unwrap();
        session.new_zone("h.a.dmz", ZoneKind::Host).unwrap();
        session.new_zone("g.b.dmz", ZoneKind::Group).unwrap();
        assert!(matches!(
            session.add_group_member("g.b.dmz", "h.a.dmz"),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_active_cascade_is_computed() {
        let mut session = session_with(seeded_backend());
        session.load().unwrap();
        session.set_zone_active("dmz", false).unwrap();

        let zones = session.zones();
        for name in ["web.dmz", "www.web.dmz", "servers.web.dmz"] {
            let handle = zones.search(name).unwrap();
            assert!(!zones.is_active(handle), "{name}");
            assert!(zones.get(handle).unwrap().active, "{name}");
        }
        let (_, errors) = session.analyze_rules();
        // rules 2 and 3 name objects inside dmz
        assert_eq!(errors.iter().map(|(n, _)| *n).collect::<Vec<_>>(), [2, 3]);

        session.set_zone_active("dmz", true).unwrap();
        let handle = session.zones().search("www.web.dmz").unwrap();
        assert!(session.zones().is_active(handle));
    }

    #[test]
    fn test_service_range_lookup() {
        let mut session = empty_session();
        session.new_service("range").unwrap();
        session.set_service_ports("range", "TCP", "1000:1010").unwrap();
        let range = session.services().search("range");
        for port in 1000..=1010 {
            assert_eq!(session.service_by_port(PROTO_TCP, port), range, "port {port}");
        }
        assert_eq!(session.service_by_port(PROTO_TCP, 999), None);
        assert_eq!(session.service_by_port(PROTO_TCP, 1011), None);

        session.delete_service("range").unwrap();
        assert_eq!(session.service_by_port(PROTO_TCP, 1005), None);
    }

    #[test]
    fn test_protect_rules_load_and_analyze() {
        let mut backend = seeded_backend();
        backend
            .seed_attr(
                crate::backend::Category::Zones,
                "office.lan",
                "RULE",
                "protect against spoofing from 10.0.0.0/8",
            )
            .seed_attr(
                crate::backend::Category::Interfaces,
                "lan",
                "RULE",
                "protect lan against dhcp-client",
            )
            .seed_attr(
                crate::backend::Category::Interfaces,
                "lan",
                "RULE",
                "protect against martians",
            )
            .seed_attr(
                crate::backend::Category::Interfaces,
                "lan",
                "RULE",
                "accept service ssh from lan to firewall",
            );
        let mut session = session_with(backend);
        let report = session.load().unwrap();
        assert_eq!(report.skipped, 1);

        let (caches, errors) = session.analyze_protect_rules();
        assert_eq!(caches.len(), 2);
        let office = session.zones().search("office.lan").unwrap();
        assert!(caches.iter().any(|c| c.who == Some(ProtectTarget::Zone(office))));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "lan");
    }

    #[test]
    fn test_blocklist_survives_reload() {
        let mut session = session_with(seeded_backend());
        session.load().unwrap();
        session.block("203.0.113.7").unwrap();
        session.block("198.51.100.0/24").unwrap();
        session.unblock("www.web.dmz").unwrap();

        session.load().unwrap();
        assert_eq!(
            session.blocklist().to_lines(),
            ["block 203.0.113.7", "block 198.51.100.0/24"]
        );
        let www = session.zones().search("www.web.dmz").unwrap();
        assert_eq!(session.zones().get(www).unwrap().refcnt_blocklist, 0);
    }
}

#[cfg(test)]
mod property_tests {
    use crate::core::rules::options::escape_quotes;
    use crate::core::rules::{assemble_rule, parse_line};
    use proptest::prelude::*;

    fn operand() -> impl Strategy<Value = String> {
        "z[a-z0-9]{0,6}(\\.z[a-z0-9]{0,6}){0,2}"
    }

    proptest! {
        #[test]
        fn test_rule_line_roundtrip(
            action in prop::sample::select(vec!["accept", "drop", "reject", "log"]),
            inactive in any::<bool>(),
            service in operand(),
            from in operand(),
            to in operand(),
            comment in proptest::option::of("[a-z][a-z\"]{0,10}"),
            chain in proptest::option::of("[a-z][a-z\"]{0,8}"),
            in_int in proptest::option::of("[a-z][a-z\"]{0,8}"),
        ) {
            let mut line = format!(
                "{}{action} service {service} from {from} to {to}",
                if inactive { ";" } else { "" }
            );
            let options: Vec<String> = [("comment", &comment), ("chain", &chain), ("in_int", &in_int)]
                .into_iter()
                .filter_map(|(key, value)| {
                    value.as_ref().map(|v| format!("{key}=\"{}\"", escape_quotes(v)))
                })
                .collect();
            if !options.is_empty() {
                line.push_str(" options ");
                line.push_str(&options.join(","));
            }

            let first = parse_line(&line).unwrap();
            let second = parse_line(&assemble_rule(&first)).unwrap();
            prop_assert_eq!(&first, &second);
            let parsed = first.options.clone().unwrap_or_default();
            prop_assert_eq!(parsed.comment, comment);
            prop_assert_eq!(parsed.chain, chain);
            prop_assert_eq!(parsed.in_int, in_int);
        }
    }
}
