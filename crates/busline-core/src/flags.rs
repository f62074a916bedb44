//! Message flags.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in the fixed message header, one byte on the wire.
    ///
    /// Bit values are fixed by the protocol and must match peer
    /// implementations exactly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u8 {
        /// The sender does not expect (and must not receive) a reply.
        const NO_REPLY_EXPECTED = 0x1;

        /// The bus must not launch an owner for the destination name.
        const NO_AUTO_START = 0x2;

        /// The destination may prompt the user for authorization.
        const ALLOW_INTERACTIVE_AUTHORIZATION = 0x4;
    }
}
