//! CoAP ping between two in-process endpoints over real UDP
//! sockets.
//!
//! Alice submits an empty CON to Bob; Bob's message layer answers
//! it with RST (there is nothing to deliver), which resolves
//! Alice's transmission as failed. That round trip is the protocol's
//! cheapest liveness check.

use std::net::UdpSocket;
use std::time::Duration;

use newt::config::Config;
use newt::core::{Core, Happening};
use newt::msg::{Id, Message};
use newt::net::Endpoint;

fn main() -> std::io::Result<()> {
  simple_logger::init_with_level(log::Level::Debug).unwrap();

  let sock_a = UdpSocket::bind("127.0.0.1:0")?;
  let sock_b = UdpSocket::bind("127.0.0.1:0")?;
  sock_a.set_nonblocking(true)?;
  sock_b.set_nonblocking(true)?;

  let bob_addr = sock_b.local_addr()?;

  let mut alice =
    Core::new(Config::default(), newt::std::Clock::new(), sock_a).unwrap();
  let mut bob =
    Core::new(Config::default(), newt::std::Clock::new(), sock_b).unwrap();

  let handle = alice.submit(Endpoint::cleartext(bob_addr), Message::ping(Id(0)))
                    .unwrap();
  log::info!("pinging {} as {:?}", bob_addr, handle.id);

  loop {
    bob.poll().unwrap();

    for happening in alice.poll().unwrap() {
      if let Happening::Resolved(h, outcome) = happening {
        log::info!("ping {:?} resolved: {:?}", h.id, outcome);
        return Ok(());
      }
    }

    std::thread::sleep(Duration::from_millis(10));
  }
}
