use crate::bulletinboard::BBError;
use crate::election::Stage;

quick_error! {
    #[derive(Debug)]
    pub enum CryptoError {
        MalformedPoint(context: String) {
            display("malformed group element ({})", context)
        }
        Embed(len: usize) {
            display("could not embed {} bytes into a group element", len)
        }
        Extract(len: usize) {
            display("group element carries an invalid length prefix {}", len)
        }
        Proof(what: String) {
            display("proof verification failed: {}", what)
        }
        Symmetric(reason: String) {
            display("symmetric encryption failure: {}", reason)
        }
        Input(reason: String) {
            display("invalid input: {}", reason)
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum ProtocolError {
        Phase(message: String) {
            display("unexpected message for current phase: {}", message)
        }
        DuplicateIndex(index: u32) {
            display("duplicate participant index {}", index)
        }
        UnknownNode(node: String) {
            display("node {} is not part of the roster", node)
        }
        UnknownElection(election: String) {
            display("no session or ledger entry for election {}", election)
        }
        Participants(found: usize, needed: usize) {
            display("insufficient participants: found {}, need {}", found, needed)
        }
        NotEligible(user: u32) {
            display("user {} is not eligible to vote", user)
        }
        NotAdmin(user: u32) {
            display("user {} is not an administrator", user)
        }
        Signature(err: ed25519_dalek::SignatureError) {
            from()
            display("signature error: {}", err)
        }
        Msg(message: String) {
            from()
            display("{}", message)
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum ThresholdError {
        Qual(size: usize, threshold: usize) {
            display("QUAL has {} members, need more than threshold {}", size, threshold)
        }
        Partials(found: usize, needed: usize) {
            display("found {} valid partials, need {}", found, needed)
        }
        DuplicateIndex(index: u32) {
            display("more than one partial claims index {}", index)
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum StageError {
        NotPermitted(operation: &'static str, stage: Stage) {
            display("{} is not permitted in stage {}", operation, stage)
        }
        Closed(election: String) {
            display("the ballot box of {} is closed", election)
        }
        Busy(operation: &'static str) {
            display("{} already in progress", operation)
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum TimeoutError {
        Expired(what: String, millis: u64) {
            display("{} did not complete within {} ms", what, millis)
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Crypto(err: CryptoError) {
            from()
            display("{}", err)
            source(err)
        }
        Protocol(err: ProtocolError) {
            from()
            display("{}", err)
            source(err)
        }
        Threshold(err: ThresholdError) {
            from()
            display("{}", err)
            source(err)
        }
        Stage(err: StageError) {
            from()
            display("{}", err)
            source(err)
        }
        Timeout(err: TimeoutError) {
            from()
            display("{}", err)
            source(err)
        }
        Ledger(err: BBError) {
            from()
            display("ledger: {}", err)
        }
        Bincode(err: bincode::Error) {
            from()
            display("serialization: {}", err)
        }
        Transport(message: String) {
            display("transport: {}", message)
        }
    }
}
